//! Durations in the notation Prometheus and Alertmanager accept for `group_wait`,
//! `group_interval` and `repeat_interval`: unit suffixed integers from the largest to the smallest
//! unit, each unit at most once, like `30s`, `4h`, `1w2d` or `1h30m`. A bare `0` is allowed too.
//!
//! [`Duration`] prints itself in canonical form, `90m` becomes `1h30m`.

use std::{fmt::Display, str::FromStr, sync::LazyLock};

use regex::{Captures, Regex};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use strum::IntoEnumIterator;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    let fragments: String = DurationUnit::iter()
        .map(|unit| format!(r"(?:(?<{}>[0-9]+){unit})?", unit.group()))
        .collect();

    Regex::new(&format!("^{fragments}$")).expect("failed to compile duration regex")
});

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(module)]
pub enum DurationParseError {
    #[snafu(display("duration must not be empty"))]
    Empty,

    #[snafu(display(
        "{input:?} is not a duration, expected something like \"30s\", \"5m\" or \"1h30m\""
    ))]
    Malformed { input: String },

    #[snafu(display("{unit} fragment {value:?} is out of range"))]
    FragmentOutOfRange {
        source: std::num::ParseIntError,
        unit: DurationUnit,
        value: String,
    },

    #[snafu(display("{input:?} is too long"))]
    Overflow { input: String },
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_millis(self) -> u64 {
        self.millis
    }

    pub const fn as_secs(self) -> u64 {
        self.millis / 1000
    }
}

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use duration_parse_error::{EmptySnafu, MalformedSnafu, OverflowSnafu};

        let input = s.trim();
        ensure!(!input.is_empty(), EmptySnafu);

        if input == "0" {
            return Ok(Self::default());
        }

        let captures = DURATION_REGEX
            .captures(input)
            .context(MalformedSnafu { input })?;

        DurationUnit::iter()
            .try_fold(0_u64, |millis, unit| {
                let fragment = unit.fragment_millis(&captures)?;
                millis
                    .checked_add(fragment)
                    .context(OverflowSnafu { input })
            })
            .map(Self::from_millis)
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.millis == 0 {
            return write!(f, "0{}", DurationUnit::Seconds);
        }

        let mut rest = self.millis;
        for unit in DurationUnit::iter() {
            let whole = rest / unit.millis();
            if whole > 0 {
                write!(f, "{whole}{unit}")?;
            }
            rest %= unit.millis();
        }

        Ok(())
    }
}

/// Units ordered from the largest to the smallest, which is both the required input order and
/// the output order of [`Duration`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum DurationUnit {
    #[strum(serialize = "y")]
    Years,

    #[strum(serialize = "w")]
    Weeks,

    #[strum(serialize = "d")]
    Days,

    #[strum(serialize = "h")]
    Hours,

    #[strum(serialize = "m")]
    Minutes,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "ms")]
    Milliseconds,
}

impl DurationUnit {
    /// A year is 365 days, like in Prometheus.
    const fn millis(self) -> u64 {
        match self {
            Self::Years => 365 * Self::Days.millis(),
            Self::Weeks => 7 * Self::Days.millis(),
            Self::Days => 24 * Self::Hours.millis(),
            Self::Hours => 60 * Self::Minutes.millis(),
            Self::Minutes => 60 * Self::Seconds.millis(),
            Self::Seconds => 1000,
            Self::Milliseconds => 1,
        }
    }

    // Capture group names must be identifiers
    fn group(self) -> String {
        format!("unit_{}", <&'static str>::from(self))
    }

    fn fragment_millis(self, captures: &Captures<'_>) -> Result<u64, DurationParseError> {
        use duration_parse_error::{FragmentOutOfRangeSnafu, OverflowSnafu};

        let Some(value) = captures.name(&self.group()) else {
            return Ok(0);
        };

        let value = value.as_str();
        let count: u64 = value.parse().context(FragmentOutOfRangeSnafu { unit: self, value })?;

        count.checked_mul(self.millis()).context(OverflowSnafu {
            input: captures[0].to_owned(),
        })
    }
}
