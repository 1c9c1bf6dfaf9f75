//! Maintains the inhibition rules of an [`Alert`] in the `inhibit_rules` section.
//!
//! Inhibition rules have no name and Alertmanager rejects unknown fields, so the owning Alert is
//! recorded as an extra label name in `equal`: `alerterator_owner_` followed by the [`AlertKey`],
//! with `_` written as `__`, `-` as `_h` and `.` as `_d`. Neither the source nor the target alert
//! carries that label, so it never changes which alerts are inhibited. Rules without such a label
//! belong to somebody else and are never touched.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::{Sequence, Value};
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::{
    crd::{self, Alert, AlertInhibitRule, AlertKey},
    document::{self, Document},
    validation,
};

/// Prefix of the `equal` label naming the Alert an inhibition rule was generated for.
pub const OWNER_LABEL_PREFIX: &str = "alerterator_owner_";

const EQUAL_FIELD: &str = "equal";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to derive the inhibition owner"))]
    DeriveKey { source: crd::Error },

    #[snafu(display("failed to read the inhibit_rules section"))]
    ReadInhibitRules { source: document::Error },

    #[snafu(display("inhibition rule {index} of alert {alert} has no targets"))]
    NoTargets { alert: AlertKey, index: usize },

    #[snafu(display("inhibition rule {index} of alert {alert} has no sources"))]
    NoSources { alert: AlertKey, index: usize },

    #[snafu(display("inhibition rule {index} of alert {alert} is invalid"))]
    InvalidRule {
        source: validation::Error,
        alert: AlertKey,
        index: usize,
    },

    #[snafu(display(
        "inhibition rule {index} of alert {alert} uses the reserved label {label:?} in labels"
    ))]
    ReservedLabel {
        alert: AlertKey,
        index: usize,
        label: String,
    },

    #[snafu(display("failed to serialize inhibition rule {index} of alert {alert}"))]
    SerializeRule {
        source: serde_yaml::Error,
        alert: AlertKey,
        index: usize,
    },
}

impl Error {
    /// Whether the Alert itself is at fault, as opposed to the document it is merged into.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(
            self,
            Self::NoTargets { .. }
                | Self::NoSources { .. }
                | Self::InvalidRule { .. }
                | Self::ReservedLabel { .. }
        )
    }
}

#[derive(Debug, Serialize)]
struct InhibitRuleConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    target_match: Option<&'a BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    target_match_re: Option<&'a BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    source_match: Option<&'a BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    source_match_re: Option<&'a BTreeMap<String, String>>,

    equal: Vec<&'a str>,
}

/// Returns the `equal` label marking a rule as owned by `key`.
pub fn owner_label(key: &AlertKey) -> String {
    let mut label = String::from(OWNER_LABEL_PREFIX);
    for c in key.as_str().chars() {
        match c {
            '_' => label.push_str("__"),
            '-' => label.push_str("_h"),
            '.' => label.push_str("_d"),
            c => label.push(c),
        }
    }
    label
}

/// Returns the [`AlertKey`] of the Alert owning `rule`, [`None`] for hand-written rules.
pub fn owner(rule: &Value) -> Option<AlertKey> {
    rule.get(EQUAL_FIELD)?
        .as_sequence()?
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|label| label.strip_prefix(OWNER_LABEL_PREFIX))
        .find_map(|encoded| AlertKey::parse(&decode_owner(encoded)?))
}

fn decode_owner(encoded: &str) -> Option<String> {
    let mut key = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c != '_' {
            key.push(c);
            continue;
        }
        key.push(match chars.next()? {
            '_' => '_',
            'h' => '-',
            'd' => '.',
            _ => return None,
        });
    }
    Some(key)
}

fn is_owned_by(rule: &Value, key: &AlertKey) -> bool {
    owner(rule).as_ref() == Some(key)
}

/// Replaces all rules owned by `alert` with freshly built ones. The new rules take the position
/// of the first old rule, or are appended if there was none. Returns the complete, updated
/// `inhibit_rules` section.
pub fn upsert(alert: &Alert, document: &Document) -> Result<Sequence> {
    let key = alert.key().context(DeriveKeySnafu)?;
    let owner_label = owner_label(&key);
    let rules = alert
        .spec
        .inhibit_rules
        .iter()
        .enumerate()
        .map(|(index, rule)| build_rule(rule, index, &key, &owner_label))
        .collect::<Result<Vec<_>>>()?;

    let mut inhibit_rules = document
        .inhibit_rules()
        .context(ReadInhibitRulesSnafu)?
        .to_vec();
    let position = inhibit_rules.iter().position(|rule| is_owned_by(rule, &key));
    let before = inhibit_rules.len();
    inhibit_rules.retain(|rule| !is_owned_by(rule, &key));
    let removed = before - inhibit_rules.len();

    let index = position.unwrap_or(inhibit_rules.len());
    debug!(owner = %key, removed, added = rules.len(), index, "replacing inhibition rules");
    inhibit_rules.splice(index..index, rules);

    Ok(inhibit_rules)
}

/// Removes all rules owned by `alert`. Returns the `inhibit_rules` section unchanged if there are
/// none.
pub fn delete(alert: &Alert, document: &Document) -> Result<Sequence> {
    let key = alert.key().context(DeriveKeySnafu)?;

    let mut inhibit_rules = document
        .inhibit_rules()
        .context(ReadInhibitRulesSnafu)?
        .to_vec();
    let before = inhibit_rules.len();
    inhibit_rules.retain(|rule| !is_owned_by(rule, &key));
    debug!(owner = %key, removed = before - inhibit_rules.len(), "deleted inhibition rules");

    Ok(inhibit_rules)
}

fn build_rule(
    rule: &AlertInhibitRule,
    index: usize,
    key: &AlertKey,
    owner_label: &str,
) -> Result<Value> {
    ensure!(
        !(rule.targets.is_empty() && rule.targets_regex.is_empty()),
        NoTargetsSnafu {
            alert: key.clone(),
            index
        }
    );
    ensure!(
        !(rule.sources.is_empty() && rule.sources_regex.is_empty()),
        NoSourcesSnafu {
            alert: key.clone(),
            index
        }
    );
    validate_rule(rule).context(InvalidRuleSnafu {
        alert: key.clone(),
        index,
    })?;
    if let Some(label) = rule
        .labels
        .iter()
        .find(|label| label.starts_with(OWNER_LABEL_PREFIX))
    {
        return ReservedLabelSnafu {
            alert: key.clone(),
            index,
            label: label.clone(),
        }
        .fail();
    }

    let config = InhibitRuleConfig {
        target_match: non_empty(&rule.targets),
        target_match_re: non_empty(&rule.targets_regex),
        source_match: non_empty(&rule.sources),
        source_match_re: non_empty(&rule.sources_regex),
        equal: rule
            .labels
            .iter()
            .map(String::as_str)
            .chain([owner_label])
            .collect(),
    };

    serde_yaml::to_value(&config).context(SerializeRuleSnafu {
        alert: key.clone(),
        index,
    })
}

fn validate_rule(rule: &AlertInhibitRule) -> Result<(), validation::Error> {
    validation::validate_label_names(rule.targets.keys())?;
    validation::validate_label_names(rule.sources.keys())?;
    validation::validate_regex_labels(&rule.targets_regex)?;
    validation::validate_regex_labels(&rule.sources_regex)?;
    validation::validate_label_names(&rule.labels)
}

fn non_empty(labels: &BTreeMap<String, String>) -> Option<&BTreeMap<String, String>> {
    (!labels.is_empty()).then_some(labels)
}
