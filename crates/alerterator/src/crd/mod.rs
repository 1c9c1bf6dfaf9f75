//! The `Alert` custom resource.
//!
//! An [`Alert`] describes who should be notified for a set of alerts, how notifications are grouped
//! and which other alerts they inhibit. Every Alert is reconciled into three entries of the shared
//! Alertmanager configuration: one route below the root route, one receiver and zero or more
//! inhibition rules. All three are tied to the Alert through its [`AlertKey`].

use std::{collections::BTreeMap, fmt::Display, sync::LazyLock};

use kube::{CustomResource, ResourceExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};

/// Separates namespace and name in an [`AlertKey`]. Neither Kubernetes namespaces nor object names
/// may contain it, which keeps the key unique per Alert.
const KEY_SEPARATOR: char = '_';

const NAMESPACE_MAX_LENGTH: usize = 63;
const LOWERCASE_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";

// <namespace>_<name>, with the namespace being a RFC 1123 label and the name a RFC 1123 subdomain
static KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({LOWERCASE_LABEL_FMT}){KEY_SEPARATOR}{LOWERCASE_LABEL_FMT}(\.{LOWERCASE_LABEL_FMT})*$"
    ))
    .expect("failed to compile alert key regex")
});

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("alert has no name"))]
    MissingName,

    #[snafu(display("alert {name:?} has no namespace"))]
    MissingNamespace { name: String },
}

/// Declares the notification rule for a group of Prometheus alerts.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[kube(
    group = "alerterator.nais.io",
    version = "v1",
    kind = "Alert",
    namespaced,
    shortname = "alert"
)]
#[serde(rename_all = "camelCase")]
pub struct AlertSpec {
    /// Notification channels. At least one channel has to be configured.
    #[serde(default)]
    pub receivers: AlertReceivers,

    /// Decides which alerts are routed to the receivers and how they are grouped.
    #[serde(default)]
    pub route: AlertRoute,

    /// Alerts which are muted while alerts of this Alert are firing.
    #[serde(default)]
    pub inhibit_rules: Vec<AlertInhibitRule>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReceivers {
    pub slack: Option<SlackReceiver>,
    pub email: Option<EmailReceiver>,
    pub webhook: Option<WebhookReceiver>,
}

impl AlertReceivers {
    pub fn is_empty(&self) -> bool {
        self.slack.is_none() && self.email.is_none() && self.webhook.is_none()
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackReceiver {
    /// The Slack channel notifications are posted to, e.g. `#team-alerts`.
    pub channel: String,

    /// Text put in front of every notification, e.g. a mention like `<!here>`.
    pub prepend_text: Option<String>,

    /// Overrides the name the notifications are posted as.
    pub username: Option<String>,

    pub icon_emoji: Option<String>,
    pub icon_url: Option<String>,

    /// Whether to also notify when alerts are resolved.
    pub send_resolved: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReceiver {
    /// Comma separated list of recipient addresses.
    pub to: String,

    /// Whether to also notify when alerts are resolved.
    pub send_resolved: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceiver {
    /// The http(s) endpoint notifications are posted to.
    pub url: String,

    /// Whether to also notify when alerts are resolved.
    pub send_resolved: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRoute {
    /// Labels an alert must carry with exactly these values.
    #[serde(default, rename = "match")]
    pub match_labels: BTreeMap<String, String>,

    /// Labels an alert must carry with values matching these regular expressions.
    #[serde(default)]
    pub match_re: BTreeMap<String, String>,

    /// Alertmanager matchers such as `severity!="info"`. Supports `=`, `!=`, `=~` and `!~`.
    #[serde(default)]
    pub matchers: Vec<String>,

    /// Whether alerts continue to be matched against the following sibling routes.
    /// Defaults to `true`.
    #[serde(default, rename = "continue")]
    pub continue_matching: Option<bool>,

    /// Labels notifications are grouped by.
    #[serde(default)]
    pub group_by: Vec<String>,

    /// How long to wait before sending the first notification of a group, e.g. `30s`.
    pub group_wait: Option<String>,

    /// How long to wait before notifying about new alerts of an already notified group, e.g. `5m`.
    pub group_interval: Option<String>,

    /// How long to wait before repeating a notification, e.g. `4h`.
    pub repeat_interval: Option<String>,
}

impl AlertRoute {
    pub fn has_predicates(&self) -> bool {
        !(self.match_labels.is_empty() && self.match_re.is_empty() && self.matchers.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInhibitRule {
    /// Labels the muted alerts must carry with exactly these values.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,

    /// Labels the muted alerts must carry with values matching these regular expressions.
    #[serde(default)]
    pub targets_regex: BTreeMap<String, String>,

    /// Labels the firing alerts must carry with exactly these values.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,

    /// Labels the firing alerts must carry with values matching these regular expressions.
    #[serde(default)]
    pub sources_regex: BTreeMap<String, String>,

    /// Labels which must be equal between the firing and the muted alert.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Identifies everything that was generated for one [`Alert`].
///
/// The key is `<namespace>_<name>`. It is the receiver name and the receiver reference of the
/// route. Inhibition rules carry it encoded in their owner label.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}{KEY_SEPARATOR}{name}"))
    }

    /// Recognizes a key generated by [`AlertKey::new`], e.g. in a receiver name. Returns [`None`]
    /// for names which cannot belong to an Alert, like `default`.
    pub fn parse(value: &str) -> Option<Self> {
        let namespace = KEY_REGEX.captures(value)?.get(1)?;
        (namespace.len() <= NAMESPACE_MAX_LENGTH).then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Alert {
    /// Derives the [`AlertKey`] from the namespace and name of this Alert.
    pub fn key(&self) -> Result<AlertKey, Error> {
        let name = self.metadata.name.as_deref().context(MissingNameSnafu)?;
        let namespace = self
            .namespace()
            .context(MissingNamespaceSnafu { name })?;

        Ok(AlertKey::new(&namespace, name))
    }
}
