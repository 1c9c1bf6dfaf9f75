//! Checks for the label names, matchers and regular expressions an Alert hands to Alertmanager.
//!
//! Alertmanager refuses to load a configuration with a single invalid predicate in it.

use std::sync::LazyLock;

use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu};

const LABEL_NAME_FMT: &str = "[a-zA-Z_][a-zA-Z0-9_]*";

static LABEL_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{LABEL_NAME_FMT}$")).expect("failed to compile label name regex")
});

// <label> <operator> <value>, where the value may be double quoted
static MATCHER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*({LABEL_NAME_FMT})\s*(=~|!~|!=|=)\s*(.*?)\s*$"
    ))
    .expect("failed to compile matcher regex")
});

type Result<T = (), E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "{name:?} is not a valid label name, it must match the regex \"[a-zA-Z_][a-zA-Z0-9_]*\""
    ))]
    InvalidLabelName { name: String },

    #[snafu(display(
        "{matcher:?} is not a valid matcher, expected <label><op><value> with op one of =, !=, =~, !~"
    ))]
    InvalidMatcher { matcher: String },

    #[snafu(display("{regex:?} is not a valid regular expression"))]
    InvalidRegex { source: regex::Error, regex: String },
}

/// The comparison a [`Matcher`] performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum MatchOperator {
    #[strum(serialize = "=")]
    Equal,

    #[strum(serialize = "!=")]
    NotEqual,

    #[strum(serialize = "=~")]
    Regex,

    #[strum(serialize = "!~")]
    NotRegex,
}

impl MatchOperator {
    fn is_regex(self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }
}

/// A parsed Alertmanager matcher like `severity!="info"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matcher {
    pub label: String,
    pub operator: MatchOperator,
    pub value: String,
}

pub fn validate_label_name(name: &str) -> Result {
    if LABEL_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        InvalidLabelNameSnafu { name }.fail()
    }
}

pub fn validate_label_names<'a>(names: impl IntoIterator<Item = &'a String>) -> Result {
    names
        .into_iter()
        .try_for_each(|name| validate_label_name(name))
}

/// Alertmanager anchors every regex on both ends, so the expression is checked the same way.
pub fn validate_regex(regex: &str) -> Result {
    Regex::new(&format!("^(?:{regex})$")).context(InvalidRegexSnafu { regex })?;
    Ok(())
}

/// Validates the label names and regular expressions of a `label -> regex` map.
pub fn validate_regex_labels<'a>(
    labels: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result {
    labels.into_iter().try_for_each(|(name, regex)| {
        validate_label_name(name)?;
        validate_regex(regex)
    })
}

pub fn parse_matcher(matcher: &str) -> Result<Matcher> {
    let captures = MATCHER_REGEX
        .captures(matcher)
        .context(InvalidMatcherSnafu { matcher })?;

    let operator = match &captures[2] {
        "=" => MatchOperator::Equal,
        "!=" => MatchOperator::NotEqual,
        "=~" => MatchOperator::Regex,
        _ => MatchOperator::NotRegex,
    };

    let raw_value = &captures[3];
    let value = raw_value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(raw_value);

    if operator.is_regex() {
        validate_regex(value)?;
    }

    Ok(Matcher {
        label: captures[1].to_owned(),
        operator,
        value: value.to_owned(),
    })
}
