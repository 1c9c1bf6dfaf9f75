//! Maintains the route of an [`Alert`] below the root route.
//!
//! Every Alert owns exactly one child of the root route, identified by its `receiver` reference
//! being the [`AlertKey`]. The order of the children decides which route Alertmanager evaluates
//! first, so existing children never move: updated routes stay where they are and new routes are
//! appended.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::{
    crd::{self, Alert, AlertKey, AlertRoute},
    document::{self, Document, Identity},
    duration::{Duration, DurationParseError},
    validation,
};

/// The identity field of a route node.
pub const RECEIVER_FIELD: &str = "receiver";

/// The fields of a route node owned by the Alert. Everything else on the node is left alone.
pub const MANAGED_FIELDS: &[&str] = &[
    RECEIVER_FIELD,
    "continue",
    "match",
    "match_re",
    "matchers",
    "group_by",
    "group_wait",
    "group_interval",
    "repeat_interval",
];

/// Special `group_by` value which groups by all labels.
const GROUP_BY_ALL: &str = "...";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to derive the route receiver"))]
    DeriveKey { source: crd::Error },

    #[snafu(display("failed to read the route section"))]
    ReadRoute { source: document::Error },

    #[snafu(display("route of alert {alert} has no match, matchRe or matchers"))]
    NoPredicates { alert: AlertKey },

    #[snafu(display("route of alert {alert} has an invalid predicate"))]
    InvalidPredicate {
        source: validation::Error,
        alert: AlertKey,
    },

    #[snafu(display("route of alert {alert} has an invalid {field}"))]
    InvalidDuration {
        source: DurationParseError,
        alert: AlertKey,
        field: &'static str,
    },

    #[snafu(display("failed to serialize route {alert}"))]
    SerializeRoute {
        source: serde_yaml::Error,
        alert: AlertKey,
    },

    #[snafu(display("serialized route {alert} is not a mapping"))]
    RouteNotMapping { alert: AlertKey },
}

impl Error {
    /// Whether the Alert itself is at fault, as opposed to the document it is merged into.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(
            self,
            Self::NoPredicates { .. } | Self::InvalidPredicate { .. } | Self::InvalidDuration { .. }
        )
    }
}

#[derive(Debug, Serialize)]
struct RouteConfig<'a> {
    receiver: &'a str,

    #[serde(rename = "continue")]
    continue_matching: bool,

    #[serde(rename = "match", skip_serializing_if = "BTreeMap::is_empty")]
    match_labels: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    match_re: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    matchers: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    group_by: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    group_wait: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    group_interval: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_interval: Option<String>,
}

/// Computes the root route of `template` with the route of `alert` in it.
///
/// If the template already holds the route, it is updated in place. Otherwise the route is taken
/// over from `current`, placed at the equivalent position of the template's children and updated.
/// Only if neither has it a new route is appended.
pub fn upsert(alert: &Alert, current: &Document, template: &Document) -> Result<Mapping> {
    let key = alert.key().context(DeriveKeySnafu)?;
    let identity = Identity::new(RECEIVER_FIELD, key.as_str());
    let desired = build_route(&alert.spec.route, &key)?;

    let root = template.route().context(ReadRouteSnafu)?;
    let mut children = document::child_routes(root).context(ReadRouteSnafu)?.to_vec();

    if let Some(index) = document::find(&children, identity) {
        debug!(route = %key, index, "updating route");
        apply_managed_fields(&mut children[index], desired);
    } else {
        let current_children = current.child_routes().context(ReadRouteSnafu)?;
        match document::find(current_children, identity) {
            Some(current_index) => {
                let index = equivalent_position(current_children, current_index, &children);
                debug!(route = %key, index, "carrying route forward from the current configuration");

                let mut node = current_children[current_index].clone();
                apply_managed_fields(&mut node, desired);
                children.insert(index, node);
            }
            None => {
                debug!(route = %key, index = children.len(), "adding route");
                children.push(Value::Mapping(desired));
            }
        }
    }

    Ok(document::with_child_routes(root, children))
}

/// Removes the route of `alert` from the children of the root route. Returns the root route
/// unchanged if there is none. Removing the last child also removes the then empty `routes`.
pub fn delete(alert: &Alert, document: &Document) -> Result<Mapping> {
    let key = alert.key().context(DeriveKeySnafu)?;
    let root = document.route().context(ReadRouteSnafu)?;

    let mut children = document::child_routes(root).context(ReadRouteSnafu)?.to_vec();
    let removed = document::remove(&mut children, Identity::new(RECEIVER_FIELD, key.as_str()));
    debug!(route = %key, removed, "deleted route");

    if removed == 0 {
        return Ok(root.clone());
    }
    if children.is_empty() {
        let mut root = root.clone();
        root.shift_remove(document::CHILD_ROUTES);
        return Ok(root);
    }
    Ok(document::with_child_routes(root, children))
}

/// Picks the index of `template_children` a route found at `current_index` of
/// `current_children` belongs at: right behind the closest preceding sibling the template also
/// has, or at the same index if there is no such sibling.
fn equivalent_position(
    current_children: &[Value],
    current_index: usize,
    template_children: &[Value],
) -> usize {
    current_children[..current_index]
        .iter()
        .rev()
        .filter_map(|sibling| document::string_field(sibling, RECEIVER_FIELD))
        .find_map(|receiver| {
            document::find(template_children, Identity::new(RECEIVER_FIELD, receiver))
        })
        .map_or(current_index.min(template_children.len()), |anchor| {
            anchor + 1
        })
}

/// Overwrites the [`MANAGED_FIELDS`] of `node` with the ones in `desired`. Managed fields missing
/// from `desired` are removed, all other fields and the key order of `node` are kept.
fn apply_managed_fields(node: &mut Value, mut desired: Mapping) {
    match node {
        Value::Mapping(node) => {
            for field in MANAGED_FIELDS {
                match desired.shift_remove(*field) {
                    Some(value) => {
                        node.insert((*field).into(), value);
                    }
                    None => {
                        node.shift_remove(*field);
                    }
                }
            }
        }
        other => *other = Value::Mapping(desired),
    }
}

fn build_route(route: &AlertRoute, key: &AlertKey) -> Result<Mapping> {
    ensure!(route.has_predicates(), NoPredicatesSnafu { alert: key.clone() });

    validate_predicates(route).context(InvalidPredicateSnafu { alert: key.clone() })?;

    let config = RouteConfig {
        receiver: key.as_str(),
        continue_matching: route.continue_matching.unwrap_or(true),
        match_labels: route.match_labels.clone(),
        match_re: route.match_re.clone(),
        matchers: route.matchers.clone(),
        group_by: route.group_by.clone(),
        group_wait: normalize_duration(route.group_wait.as_deref(), "groupWait", key)?,
        group_interval: normalize_duration(route.group_interval.as_deref(), "groupInterval", key)?,
        repeat_interval: normalize_duration(
            route.repeat_interval.as_deref(),
            "repeatInterval",
            key,
        )?,
    };

    match serde_yaml::to_value(&config).context(SerializeRouteSnafu { alert: key.clone() })? {
        Value::Mapping(route) => Ok(route),
        _ => RouteNotMappingSnafu { alert: key.clone() }.fail(),
    }
}

fn validate_predicates(route: &AlertRoute) -> Result<(), validation::Error> {
    validation::validate_label_names(route.match_labels.keys())?;
    validation::validate_regex_labels(&route.match_re)?;
    for matcher in &route.matchers {
        validation::parse_matcher(matcher)?;
    }

    route
        .group_by
        .iter()
        .filter(|label| label.as_str() != GROUP_BY_ALL)
        .try_for_each(|label| validation::validate_label_name(label))
}

fn normalize_duration(
    duration: Option<&str>,
    field: &'static str,
    key: &AlertKey,
) -> Result<Option<String>> {
    duration
        .map(|duration| -> Result<String> {
            let duration: Duration = duration.parse().context(InvalidDurationSnafu {
                alert: key.clone(),
                field,
            })?;
            Ok(duration.to_string())
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::crd::AlertSpec;

    fn alert(namespace: &str, name: &str, route: &str) -> Alert {
        let spec: AlertSpec =
            serde_yaml::from_str(&format!("route: {route}")).expect("test YAML is valid");
        let mut alert = Alert::new(name, spec);
        alert.metadata.namespace = Some(namespace.to_owned());
        alert
    }

    fn config_document(routes: &str) -> Document {
        let routes = routes
            .lines()
            .map(|line| format!("    {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        Document::parse(&format!(
            "route:\n  receiver: default\n  routes:\n{routes}\nreceivers: []\ninhibit_rules: []\n"
        ))
        .expect("test document is valid")
    }

    fn receivers_of(route: &Mapping) -> Vec<String> {
        document::child_routes(route)
            .expect("routes are a sequence")
            .iter()
            .filter_map(|child| document::string_field(child, RECEIVER_FIELD))
            .map(ToOwned::to_owned)
            .collect()
    }

    #[test]
    fn append_new_route() {
        let alert = alert(
            "team-a",
            "app",
            "{match: {team: team-a}, groupBy: [alertname], groupWait: 90s}",
        );
        let template = config_document("[{receiver: platform}]");

        let route = upsert(&alert, &template, &template).expect("route is valid");

        let expected: Value = serde_yaml::from_str(indoc! {"
            receiver: team-a_app
            continue: true
            match:
              team: team-a
            group_by: [alertname]
            group_wait: 1m30s
        "})
        .expect("test YAML is valid");
        let children = document::child_routes(&route).expect("routes are a sequence");
        assert_eq!(children.len(), 2);
        assert_eq!(children[1], expected);
        assert_eq!(route.get("receiver"), Some(&Value::from("default")));
    }

    #[test]
    fn carry_forward_and_overwrite_from_current() {
        let alert = alert("team-a", "app", "{match: {severity: warning}}");
        let current = config_document(indoc! {"
            - receiver: team-a_app
              match:
                severity: critical
              match_re:
                app: old.*
              routes:
                - receiver: team-a_app
                  match: {env: prod}
        "});
        let template = config_document("[]");

        let route = upsert(&alert, &current, &template).expect("route is valid");

        let expected: Value = serde_yaml::from_str(indoc! {"
            receiver: team-a_app
            match:
              severity: warning
            routes:
              - receiver: team-a_app
                match: {env: prod}
            continue: true
        "})
        .expect("test YAML is valid");
        assert_eq!(
            document::child_routes(&route).expect("routes are a sequence"),
            [expected]
        );
    }

    #[test]
    fn carried_route_keeps_relative_position() {
        let alert = alert("team-b", "app", "{match: {team: team-b}}");
        let current = config_document(
            "[{receiver: platform}, {receiver: team-a_app}, {receiver: team-b_app}, {receiver: team-c_app}]",
        );
        let template =
            config_document("[{receiver: platform}, {receiver: team-a_app}, {receiver: team-c_app}]");

        let route = upsert(&alert, &current, &template).expect("route is valid");

        assert_eq!(
            receivers_of(&route),
            ["platform", "team-a_app", "team-b_app", "team-c_app"]
        );
    }

    #[rstest]
    #[case::first_of_current(0, &["x", "a", "b"], &[], 0)]
    #[case::clamped(2, &["x", "y", "a"], &[], 0)]
    #[case::behind_anchor(2, &["a", "b", "x"], &["a", "c"], 1)]
    #[case::closest_anchor_wins(3, &["a", "b", "c", "x"], &["b", "a"], 1)]
    #[case::same_index(1, &["y", "x"], &["p", "q"], 1)]
    fn equivalent_positions(
        #[case] current_index: usize,
        #[case] current: &[&str],
        #[case] template: &[&str],
        #[case] expected: usize,
    ) {
        let nodes = |receivers: &[&str]| -> Vec<Value> {
            receivers
                .iter()
                .map(|receiver| {
                    let mut node = Mapping::new();
                    node.insert(RECEIVER_FIELD.into(), (*receiver).into());
                    Value::Mapping(node)
                })
                .collect()
        };

        assert_eq!(
            equivalent_position(&nodes(current), current_index, &nodes(template)),
            expected
        );
    }

    #[test]
    fn update_in_place_keeps_order_and_unmanaged_fields() {
        let alert = alert(
            "team-a",
            "app",
            r#"{matchers: ['severity!="info"'], continue: false}"#,
        );
        let template = config_document(indoc! {"
            - receiver: platform
            - receiver: team-a_app
              match: {team: team-a}
              group_wait: 30s
              mute_time_intervals: [weekends]
            - receiver: team-b_app
        "});

        let route = upsert(&alert, &template, &template).expect("route is valid");

        let children = document::child_routes(&route).expect("routes are a sequence");
        assert_eq!(receivers_of(&route), ["platform", "team-a_app", "team-b_app"]);
        let expected: Value = serde_yaml::from_str(indoc! {r#"
            receiver: team-a_app
            mute_time_intervals: [weekends]
            continue: false
            matchers: ['severity!="info"']
        "#})
        .expect("test YAML is valid");
        assert_eq!(children[1], expected);
    }

    #[test]
    fn upsert_is_idempotent() {
        let alert = alert("team-a", "app", "{match: {team: team-a}, repeatInterval: 4h}");
        let mut template = config_document("[]");

        let first = upsert(&alert, &template, &template).expect("route is valid");
        template.set_route(first.clone());
        let second = upsert(&alert, &template, &template).expect("route is valid");

        assert_eq!(first, second);
    }

    #[rstest]
    #[case::no_predicates("{groupWait: 30s}")]
    #[case::invalid_label("{match: {team-name: a}}")]
    #[case::invalid_regex("{matchRe: {team: '(a'}}")]
    #[case::invalid_matcher("{matchers: [team]}")]
    #[case::invalid_group_by("{match: {team: a}, groupBy: [app.kubernetes.io/name]}")]
    #[case::invalid_duration("{match: {team: a}, repeatInterval: 4 hours}")]
    fn invalid_route(#[case] route: &str) {
        let alert = alert("team-a", "app", route);
        let template = config_document("[]");

        let error = upsert(&alert, &template, &template).expect_err("route is invalid");
        assert!(error.is_invalid_spec(), "unexpected error: {error}");
    }

    #[test]
    fn group_by_all_labels() {
        let alert = alert("team-a", "app", "{match: {team: a}, groupBy: ['...']}");
        let template = config_document("[]");

        assert!(upsert(&alert, &template, &template).is_ok());
    }

    #[test]
    fn delete_route() {
        let alert = alert("team-a", "app", "{}");
        let document =
            config_document("[{receiver: platform}, {receiver: team-a_app}, {receiver: team-b_app}]");

        let route = delete(&alert, &document).expect("document is valid");

        assert_eq!(receivers_of(&route), ["platform", "team-b_app"]);
    }

    #[test]
    fn delete_unknown_route_is_noop() {
        let alert = alert("team-z", "never-added", "{}");
        let document = Document::parse("route: {receiver: default}\nreceivers: []\ninhibit_rules: []\n")
            .expect("test document is valid");

        let route = delete(&alert, &document).expect("document is valid");

        assert_eq!(&route, document.route().expect("route is a mapping"));
        assert!(route.get(document::CHILD_ROUTES).is_none());
    }

    #[test]
    fn delete_last_route_removes_routes() {
        let alert = alert("team-a", "app", "{match: {team: a}}");
        let template = Document::parse("route: {receiver: default}\nreceivers: []\ninhibit_rules: []\n")
            .expect("test document is valid");

        let mut document = template.clone();
        document.set_route(upsert(&alert, &template, &template).expect("route is valid"));
        let route = delete(&alert, &document).expect("document is valid");

        assert_eq!(&route, template.route().expect("route is a mapping"));
    }
}
