use alerterator::{
    crd::{Alert, AlertSpec},
    document::{self, Document},
    merge::{inhibition, receiver::NAME_FIELD, route::RECEIVER_FIELD},
    reconcile::FailureReason,
    reconciler::{Outcome, Reconciler},
    store::MemoryStore,
};
use indoc::{formatdoc, indoc};
use serde_yaml::Value;

const CONFIG: &str = "alertmanager";
const TEMPLATE: &str = "alertmanager-template";

const TEMPLATE_DOCUMENT: &str = indoc! {r#"
    global:
      slack_api_url: https://hooks.slack.com/services/T000/B000/XXX
    route:
      receiver: default
      group_by: [alertname]
      routes:
        - receiver: platform
          match:
            team: platform
    receivers:
      - name: default
      - name: platform
        webhook_configs:
          - url: https://platform.example.com/alerts
    inhibit_rules:
      - source_match: {alertname: ClusterDown}
        target_match: {severity: warning}
    templates:
      - /etc/alertmanager/*.tmpl
"#};

fn alert(namespace: &str, name: &str, severity: &str) -> Alert {
    let spec: AlertSpec = serde_yaml::from_str(&formatdoc! {
        r##"
            receivers:
              slack:
                channel: "#{namespace}"
            route:
              match:
                team: {namespace}
                severity: {severity}
              groupBy: [alertname]
            inhibitRules:
              - targets: {{severity: warning}}
                sources: {{severity: critical}}
                labels: [alertname]
        "##
    })
    .expect("test YAML is valid");

    let mut alert = Alert::new(name, spec);
    alert.metadata.namespace = Some(namespace.to_owned());
    alert
}

fn reconciler(current: &str, template: &str) -> Reconciler<MemoryStore> {
    let store = MemoryStore::new()
        .with_document(CONFIG, current)
        .with_document(TEMPLATE, template);
    Reconciler::new(store, CONFIG, TEMPLATE)
}

fn stored(reconciler: &Reconciler<MemoryStore>) -> Document {
    let raw = reconciler
        .store()
        .document(CONFIG)
        .expect("configuration exists");
    Document::parse(&raw).expect("stored configuration is valid")
}

fn identities<'a>(entries: &'a [Value], field: &str) -> Vec<&'a str> {
    entries
        .iter()
        .filter_map(|entry| document::string_field(entry, field))
        .collect()
}

/// All entries of the Alert `key`, in document order.
fn entries_of(document: &Document, key: &str) -> (Vec<Value>, Vec<Value>, Vec<Value>) {
    let select = |entries: &[Value], field: &str| -> Vec<Value> {
        entries
            .iter()
            .filter(|entry| document::string_field(entry, field) == Some(key))
            .cloned()
            .collect()
    };

    (
        select(document.child_routes().expect("valid"), RECEIVER_FIELD),
        select(document.receivers().expect("valid"), NAME_FIELD),
        document
            .inhibit_rules()
            .expect("valid")
            .iter()
            .filter(|rule| inhibition::owner(rule).is_some_and(|owner| owner.as_str() == key))
            .cloned()
            .collect(),
    )
}

fn owners(rules: &[Value]) -> Vec<String> {
    rules
        .iter()
        .filter_map(inhibition::owner)
        .map(|owner| owner.to_string())
        .collect()
}

#[tokio::test]
async fn add_alert_to_template() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);

    let outcome = reconciler
        .add_or_update(&alert("team-a", "app", "critical"))
        .await
        .expect("reconciliation succeeds");
    assert_eq!(outcome, Outcome::Updated);

    let document = stored(&reconciler);
    assert_eq!(
        identities(document.child_routes().expect("valid"), RECEIVER_FIELD),
        ["platform", "team-a_app"]
    );
    assert_eq!(
        identities(document.receivers().expect("valid"), NAME_FIELD),
        ["default", "platform", "team-a_app"]
    );
    assert_eq!(document.inhibit_rules().expect("valid").len(), 2);
    assert!(document.section("global").is_some());
    assert!(document.section("templates").is_some());
}

#[tokio::test]
async fn reconciling_twice_changes_nothing() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    let alert = alert("team-a", "app", "critical");

    reconciler
        .add_or_update(&alert)
        .await
        .expect("reconciliation succeeds");
    let first = reconciler.store().document(CONFIG);

    let outcome = reconciler
        .add_or_update(&alert)
        .await
        .expect("reconciliation succeeds");
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(reconciler.store().document(CONFIG), first);
}

#[tokio::test]
async fn alerts_do_not_affect_each_other() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);

    reconciler
        .add_or_update(&alert("team-a", "app", "critical"))
        .await
        .expect("reconciliation succeeds");
    reconciler
        .add_or_update(&alert("team-b", "app", "critical"))
        .await
        .expect("reconciliation succeeds");
    let before = entries_of(&stored(&reconciler), "team-b_app");

    reconciler
        .add_or_update(&alert("team-a", "app", "warning"))
        .await
        .expect("reconciliation succeeds");
    reconciler
        .delete(&alert("team-a", "app", "warning"))
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    assert_eq!(entries_of(&document, "team-b_app"), before);
    assert_eq!(
        identities(document.child_routes().expect("valid"), RECEIVER_FIELD),
        ["platform", "team-b_app"]
    );
}

#[tokio::test]
async fn updated_route_keeps_its_position() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    for namespace in ["team-a", "team-b", "team-c"] {
        reconciler
            .add_or_update(&alert(namespace, "app", "critical"))
            .await
            .expect("reconciliation succeeds");
    }

    reconciler
        .add_or_update(&alert("team-b", "app", "warning"))
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    let routes = document.child_routes().expect("valid");
    assert_eq!(
        identities(routes, RECEIVER_FIELD),
        ["platform", "team-a_app", "team-b_app", "team-c_app"]
    );
    assert_eq!(
        routes[2].get("match").and_then(|m| m.get("severity")),
        Some(&Value::from("warning"))
    );
}

#[tokio::test]
async fn updated_receiver_and_rules_keep_their_position() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    for namespace in ["team-a", "team-b", "team-c"] {
        reconciler
            .add_or_update(&alert(namespace, "app", "critical"))
            .await
            .expect("reconciliation succeeds");
    }
    let before = stored(&reconciler);

    reconciler
        .add_or_update(&alert("team-b", "app", "warning"))
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    let receivers = document.receivers().expect("valid");
    assert_eq!(
        identities(receivers, NAME_FIELD),
        ["default", "platform", "team-a_app", "team-b_app", "team-c_app"]
    );
    assert_eq!(receivers, before.receivers().expect("valid"));
    assert_eq!(
        owners(document.inhibit_rules().expect("valid")),
        ["team-a_app", "team-b_app", "team-c_app"]
    );
    assert_eq!(
        document.inhibit_rules().expect("valid"),
        before.inhibit_rules().expect("valid")
    );
}

#[tokio::test]
async fn add_then_delete_restores_template() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    let alert = alert("team-a", "app", "critical");

    reconciler
        .add_or_update(&alert)
        .await
        .expect("reconciliation succeeds");
    reconciler
        .delete(&alert)
        .await
        .expect("reconciliation succeeds");

    let template = Document::parse(TEMPLATE_DOCUMENT).expect("template is valid");
    assert_eq!(stored(&reconciler), template);
}

#[tokio::test]
async fn every_route_references_a_receiver() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    for (namespace, name) in [("team-a", "app"), ("team-b", "db"), ("team-a", "db")] {
        reconciler
            .add_or_update(&alert(namespace, name, "critical"))
            .await
            .expect("reconciliation succeeds");
    }
    reconciler
        .delete(&alert("team-b", "db", "critical"))
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    let receivers = identities(document.receivers().expect("valid"), NAME_FIELD);
    for route in identities(document.child_routes().expect("valid"), RECEIVER_FIELD) {
        assert!(receivers.contains(&route), "route {route} has no receiver");
    }

    let mut unique = receivers.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), receivers.len(), "receiver names are unique");
}

#[tokio::test]
async fn current_route_is_updated_against_empty_template() {
    let current = indoc! {r##"
        route:
          receiver: default
          routes:
            - receiver: team-a_app
              continue: true
              match:
                severity: critical
        receivers:
          - name: team-a_app
            slack_configs:
              - channel: "#old"
        inhibit_rules: []
    "##};
    let template = indoc! {"
        route:
          receiver: default
          routes: []
        receivers: []
        inhibit_rules: []
    "};
    let reconciler = reconciler(current, template);
    let mut alert = alert("team-a", "app", "warning");
    alert.spec.route.match_labels.remove("team");
    alert.spec.inhibit_rules.clear();

    reconciler
        .add_or_update(&alert)
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    let expected_route: Value = serde_yaml::from_str(indoc! {"
        receiver: team-a_app
        continue: true
        match:
          severity: warning
        group_by: [alertname]
    "})
    .expect("test YAML is valid");
    assert_eq!(document.child_routes().expect("valid"), [expected_route]);
    assert_eq!(
        identities(document.receivers().expect("valid"), NAME_FIELD),
        ["team-a_app"]
    );
}

#[tokio::test]
async fn entries_of_other_alerts_are_carried_forward() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    reconciler
        .add_or_update(&alert("team-b", "app", "critical"))
        .await
        .expect("reconciliation succeeds");
    let before = entries_of(&stored(&reconciler), "team-b_app");

    // The template never contains Alert entries, so team-b only survives by carry forward
    reconciler
        .add_or_update(&alert("team-a", "app", "critical"))
        .await
        .expect("reconciliation succeeds");

    let document = stored(&reconciler);
    assert_eq!(entries_of(&document, "team-b_app"), before);
    assert_eq!(
        identities(document.child_routes().expect("valid"), RECEIVER_FIELD),
        ["platform", "team-b_app", "team-a_app"]
    );
}

#[tokio::test]
async fn delete_last_alert_empties_sections() {
    let current = indoc! {r##"
        route:
          receiver: team-a_app
          routes:
            - receiver: team-a_app
              match: {severity: critical}
        receivers:
          - name: team-a_app
            slack_configs:
              - channel: "#team-a"
        inhibit_rules:
          - source_match: {severity: critical}
            target_match: {severity: warning}
            equal: [alertname, alerterator_owner_team_ha__app]
    "##};
    let reconciler = reconciler(current, current);

    let outcome = reconciler
        .delete(&alert("team-a", "app", "critical"))
        .await
        .expect("reconciliation succeeds");
    assert_eq!(outcome, Outcome::Updated);

    let document = stored(&reconciler);
    assert!(document.child_routes().expect("valid").is_empty());
    assert!(document.receivers().expect("valid").is_empty());
    assert!(document.inhibit_rules().expect("valid").is_empty());
}

#[tokio::test]
async fn delete_unknown_alert_is_noop() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);

    let outcome = reconciler
        .delete(&alert("team-z", "never-added", "critical"))
        .await
        .expect("reconciliation succeeds");

    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(
        reconciler.store().document(CONFIG).as_deref(),
        Some(TEMPLATE_DOCUMENT)
    );
}

#[tokio::test]
async fn invalid_alert_leaves_store_untouched() {
    let reconciler = reconciler(TEMPLATE_DOCUMENT, TEMPLATE_DOCUMENT);
    let mut alert = alert("team-a", "app", "critical");
    alert.spec.route.group_wait = Some("soon".to_owned());

    let error = reconciler
        .add_or_update(&alert)
        .await
        .expect_err("alert is invalid");

    assert_eq!(error.reason(), FailureReason::InvalidRouteSpec);
    assert_eq!(
        reconciler.store().document(CONFIG).as_deref(),
        Some(TEMPLATE_DOCUMENT)
    );
}

#[tokio::test]
async fn missing_template_is_unavailable() {
    let store = MemoryStore::new().with_document(CONFIG, TEMPLATE_DOCUMENT);
    let reconciler = Reconciler::new(store, CONFIG, TEMPLATE);

    let error = reconciler
        .add_or_update(&alert("team-a", "app", "critical"))
        .await
        .expect_err("template is missing");

    assert_eq!(error.reason(), FailureReason::ConfigUnavailable);
}

#[tokio::test]
async fn malformed_current_is_rejected() {
    let reconciler = reconciler("route: {receiver: default}\nreceivers: []\n", TEMPLATE_DOCUMENT);

    let error = reconciler
        .delete(&alert("team-a", "app", "critical"))
        .await
        .expect_err("inhibit_rules are missing");

    assert_eq!(error.reason(), FailureReason::MalformedDocument);
}

#[tokio::test]
async fn failed_write_is_reported() {
    let store = MemoryStore::new()
        .with_document(CONFIG, TEMPLATE_DOCUMENT)
        .with_document(TEMPLATE, TEMPLATE_DOCUMENT)
        .read_only();
    let reconciler = Reconciler::new(store, CONFIG, TEMPLATE);

    let error = reconciler
        .add_or_update(&alert("team-a", "app", "critical"))
        .await
        .expect_err("store is read-only");

    assert_eq!(error.reason(), FailureReason::PersistFailed);
}
