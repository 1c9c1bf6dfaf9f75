//! The Alertmanager configuration document.
//!
//! The document is kept as a generic, order preserving YAML tree ([`serde_yaml::Value`]), so keys
//! this crate knows nothing about (`global`, `templates`, `time_intervals`, ...) survive a load,
//! mutate and save cycle unchanged. Only the three sections the reconciliation works on are
//! exposed through typed accessors, which fail with an [`Error`] if the section is missing or has
//! the wrong shape.
//!
//! Collections are searched and edited by [`Identity`], never by content.

use serde_yaml::{Mapping, Sequence, Value};
use snafu::{OptionExt, ResultExt, Snafu};

use alerterator_shared::yaml::{self, SerializeOptions};

pub const ROUTE: &str = "route";
pub const RECEIVERS: &str = "receivers";
pub const INHIBIT_RULES: &str = "inhibit_rules";

/// The list of child routes of a route node.
pub const CHILD_ROUTES: &str = "routes";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse configuration document"))]
    ParseDocument { source: serde_yaml::Error },

    #[snafu(display("configuration document must be a mapping, found {found}"))]
    RootNotMapping { found: &'static str },

    #[snafu(display("required section {section:?} is missing"))]
    MissingSection { section: String },

    #[snafu(display("section {section:?} must be a {expected}, found {found}"))]
    UnexpectedShape {
        section: String,
        expected: &'static str,
        found: &'static str,
    },

    #[snafu(display("failed to serialize configuration document"))]
    SerializeDocument { source: yaml::Error },
}

/// A parsed configuration document.
///
/// All three required sections (and the child routes of the root route) are checked when
/// parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    root: Mapping,
}

impl Document {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(raw).context(ParseDocumentSnafu)?;
        let Value::Mapping(root) = value else {
            return RootNotMappingSnafu {
                found: kind_of(&value),
            }
            .fail();
        };

        let document = Self { root };
        document.child_routes()?;
        document.receivers()?;
        document.inhibit_rules()?;

        Ok(document)
    }

    /// Serializes the document back into YAML, keeping the order of all keys.
    pub fn to_yaml(&self) -> Result<String> {
        yaml::to_string(&self.root, SerializeOptions::plain()).context(SerializeDocumentSnafu)
    }

    /// Returns any top-level section, regardless of its shape.
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    /// The root route node.
    pub fn route(&self) -> Result<&Mapping> {
        match self.required(ROUTE)? {
            Value::Mapping(route) => Ok(route),
            other => UnexpectedShapeSnafu {
                section: ROUTE,
                expected: "mapping",
                found: kind_of(other),
            }
            .fail(),
        }
    }

    pub fn receivers(&self) -> Result<&[Value]> {
        sequence(Some(self.required(RECEIVERS)?), RECEIVERS)
    }

    pub fn inhibit_rules(&self) -> Result<&[Value]> {
        sequence(Some(self.required(INHIBIT_RULES)?), INHIBIT_RULES)
    }

    /// The children of the root route. A root route without `routes` has no children.
    pub fn child_routes(&self) -> Result<&[Value]> {
        child_routes(self.route()?)
    }

    pub fn set_route(&mut self, route: Mapping) {
        self.root.insert(ROUTE.into(), Value::Mapping(route));
    }

    pub fn set_receivers(&mut self, receivers: Sequence) {
        self.root.insert(RECEIVERS.into(), Value::Sequence(receivers));
    }

    pub fn set_inhibit_rules(&mut self, inhibit_rules: Sequence) {
        self.root
            .insert(INHIBIT_RULES.into(), Value::Sequence(inhibit_rules));
    }

    fn required(&self, section: &str) -> Result<&Value> {
        self.root.get(section).context(MissingSectionSnafu { section })
    }
}

/// Returns the `routes` of a route node.
pub fn child_routes(route: &Mapping) -> Result<&[Value]> {
    sequence(route.get(CHILD_ROUTES), "route.routes")
}

/// Returns a copy of `route` with its children replaced by `children`. Existing `routes` keep
/// their position within the node.
pub fn with_child_routes(route: &Mapping, children: Sequence) -> Mapping {
    let mut route = route.clone();
    route.insert(CHILD_ROUTES.into(), Value::Sequence(children));
    route
}

// A missing or null collection is treated as empty
fn sequence<'a>(value: Option<&'a Value>, section: &str) -> Result<&'a [Value]> {
    match value {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Sequence(entries)) => Ok(entries),
        Some(other) => UnexpectedShapeSnafu {
            section,
            expected: "sequence",
            found: kind_of(other),
        }
        .fail(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Identifies an entry of a collection by the string value of one of its fields, e.g. a receiver
/// by its `name`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity<'a> {
    field: &'a str,
    value: &'a str,
}

impl<'a> Identity<'a> {
    pub const fn new(field: &'a str, value: &'a str) -> Self {
        Self { field, value }
    }

    pub fn matches(&self, entry: &Value) -> bool {
        string_field(entry, self.field) == Some(self.value)
    }
}

/// Whether [`upsert`] replaced an existing entry or appended a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Replaced { index: usize },
    Appended { index: usize },
}

/// Returns the string value of `field` if `entry` is a mapping containing it.
pub fn string_field<'a>(entry: &'a Value, field: &str) -> Option<&'a str> {
    entry.get(field).and_then(Value::as_str)
}

pub fn find(entries: &[Value], identity: Identity<'_>) -> Option<usize> {
    entries.iter().position(|entry| identity.matches(entry))
}

/// Replaces the first entry matching `identity` in place or appends `entry` at the end.
pub fn upsert(entries: &mut Sequence, identity: Identity<'_>, entry: Value) -> Upserted {
    match find(entries, identity) {
        Some(index) => {
            entries[index] = entry;
            Upserted::Replaced { index }
        }
        None => {
            entries.push(entry);
            Upserted::Appended {
                index: entries.len() - 1,
            }
        }
    }
}

/// Removes all entries matching `identity` and returns how many were removed.
pub fn remove(entries: &mut Sequence, identity: Identity<'_>) -> usize {
    let before = entries.len();
    entries.retain(|entry| !identity.matches(entry));
    before - entries.len()
}
