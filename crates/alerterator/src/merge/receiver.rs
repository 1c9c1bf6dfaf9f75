//! Maintains the receiver of an [`Alert`] in the `receivers` section.

use serde::Serialize;
use serde_yaml::{Sequence, Value};
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;
use url::Url;

use crate::{
    crd::{self, Alert, AlertKey, EmailReceiver, SlackReceiver, WebhookReceiver},
    document::{self, Document, Identity, Upserted},
};

/// The identity field of a receiver.
pub const NAME_FIELD: &str = "name";

const SLACK_DEFAULT_TEXT: &str = r#"{{ template "slack.default.text" . }}"#;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to derive the receiver name"))]
    DeriveKey { source: crd::Error },

    #[snafu(display("failed to read the receivers section"))]
    ReadReceivers { source: document::Error },

    #[snafu(display("alert {alert} does not configure any notification receiver"))]
    NoReceiver { alert: AlertKey },

    #[snafu(display("the slack receiver of alert {alert} has no channel"))]
    MissingSlackChannel { alert: AlertKey },

    #[snafu(display("the email receiver of alert {alert} has an invalid address {to:?}"))]
    InvalidEmailAddress { alert: AlertKey, to: String },

    #[snafu(display("the webhook receiver of alert {alert} has an invalid url {url:?}"))]
    InvalidWebhookUrl {
        source: url::ParseError,
        alert: AlertKey,
        url: String,
    },

    #[snafu(display(
        "the webhook receiver of alert {alert} uses scheme {scheme:?}, only http and https are supported"
    ))]
    UnsupportedWebhookScheme { alert: AlertKey, scheme: String },

    #[snafu(display("failed to serialize receiver {alert}"))]
    SerializeReceiver {
        source: serde_yaml::Error,
        alert: AlertKey,
    },
}

impl Error {
    /// Whether the Alert itself is at fault, as opposed to the document it is merged into.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(
            self,
            Self::NoReceiver { .. }
                | Self::MissingSlackChannel { .. }
                | Self::InvalidEmailAddress { .. }
                | Self::InvalidWebhookUrl { .. }
                | Self::UnsupportedWebhookScheme { .. }
        )
    }
}

#[derive(Debug, Serialize)]
struct ReceiverConfig<'a> {
    name: &'a str,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    slack_configs: Vec<SlackConfig<'a>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    email_configs: Vec<EmailConfig<'a>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    webhook_configs: Vec<WebhookConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct SlackConfig<'a> {
    channel: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    send_resolved: Option<bool>,
}

#[derive(Debug, Serialize)]
struct EmailConfig<'a> {
    to: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    send_resolved: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WebhookConfig<'a> {
    url: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    send_resolved: Option<bool>,
}

/// Adds the receiver of `alert` to the receivers of `document`, or replaces it in place if a
/// receiver with the same name exists. Returns the complete, updated `receivers` section.
pub fn upsert(alert: &Alert, document: &Document) -> Result<Sequence> {
    let key = alert.key().context(DeriveKeySnafu)?;
    let receiver = build_receiver(alert, &key)?;

    let mut receivers = document.receivers().context(ReadReceiversSnafu)?.to_vec();
    match document::upsert(
        &mut receivers,
        Identity::new(NAME_FIELD, key.as_str()),
        receiver,
    ) {
        Upserted::Replaced { index } => debug!(receiver = %key, index, "replaced receiver"),
        Upserted::Appended { index } => debug!(receiver = %key, index, "added receiver"),
    }

    Ok(receivers)
}

/// Removes the receiver of `alert` from `document`. Returns the `receivers` section unchanged if
/// there is none.
pub fn delete(alert: &Alert, document: &Document) -> Result<Sequence> {
    let key = alert.key().context(DeriveKeySnafu)?;

    let mut receivers = document.receivers().context(ReadReceiversSnafu)?.to_vec();
    let removed = document::remove(&mut receivers, Identity::new(NAME_FIELD, key.as_str()));
    debug!(receiver = %key, removed, "deleted receiver");

    Ok(receivers)
}

fn build_receiver(alert: &Alert, key: &AlertKey) -> Result<Value> {
    let receivers = &alert.spec.receivers;
    ensure!(!receivers.is_empty(), NoReceiverSnafu { alert: key.clone() });

    let config = ReceiverConfig {
        name: key.as_str(),
        slack_configs: receivers
            .slack
            .iter()
            .map(|slack| slack_config(slack, key))
            .collect::<Result<_>>()?,
        email_configs: receivers
            .email
            .iter()
            .map(|email| email_config(email, key))
            .collect::<Result<_>>()?,
        webhook_configs: receivers
            .webhook
            .iter()
            .map(|webhook| webhook_config(webhook, key))
            .collect::<Result<_>>()?,
    };

    serde_yaml::to_value(&config).context(SerializeReceiverSnafu { alert: key.clone() })
}

fn slack_config<'a>(slack: &'a SlackReceiver, key: &AlertKey) -> Result<SlackConfig<'a>> {
    let channel = slack.channel.trim();
    ensure!(
        !channel.is_empty(),
        MissingSlackChannelSnafu { alert: key.clone() }
    );

    Ok(SlackConfig {
        channel,
        text: slack
            .prepend_text
            .as_deref()
            .map(|prepend| format!("{prepend}{SLACK_DEFAULT_TEXT}")),
        username: slack.username.as_deref(),
        icon_emoji: slack.icon_emoji.as_deref(),
        icon_url: slack.icon_url.as_deref(),
        send_resolved: slack.send_resolved,
    })
}

fn email_config<'a>(email: &'a EmailReceiver, key: &AlertKey) -> Result<EmailConfig<'a>> {
    let to = email.to.trim();
    ensure!(
        !to.is_empty() && to.split(',').map(str::trim).all(is_address),
        InvalidEmailAddressSnafu {
            alert: key.clone(),
            to,
        }
    );

    Ok(EmailConfig {
        to,
        send_resolved: email.send_resolved,
    })
}

fn is_address(address: &str) -> bool {
    matches!(address.split_once('@'), Some((user, host)) if !user.is_empty() && !host.is_empty())
}

fn webhook_config<'a>(webhook: &'a WebhookReceiver, key: &AlertKey) -> Result<WebhookConfig<'a>> {
    let url = Url::parse(&webhook.url).context(InvalidWebhookUrlSnafu {
        alert: key.clone(),
        url: &webhook.url,
    })?;
    ensure!(
        matches!(url.scheme(), "http" | "https"),
        UnsupportedWebhookSchemeSnafu {
            alert: key.clone(),
            scheme: url.scheme(),
        }
    );

    Ok(WebhookConfig {
        url: &webhook.url,
        send_resolved: webhook.send_resolved,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::crd::AlertSpec;

    fn alert(namespace: &str, name: &str, spec: &str) -> Alert {
        let spec: AlertSpec = serde_yaml::from_str(spec).expect("test YAML is valid");
        let mut alert = Alert::new(name, spec);
        alert.metadata.namespace = Some(namespace.to_owned());
        alert
    }

    fn config_document(receivers: &str) -> Document {
        let receivers = receivers
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        Document::parse(&format!(
            "route:\n  receiver: default\nreceivers:\n{receivers}\ninhibit_rules: []\n"
        ))
        .expect("test document is valid")
    }

    #[test]
    fn append_new_receiver() {
        let alert = alert(
            "team-a",
            "app",
            indoc! {r##"
                receivers:
                  slack:
                    channel: "#team-a"
                    prependText: "<!here> "
                    sendResolved: true
                  email:
                    to: team-a@example.com
            "##},
        );

        let receivers = upsert(&alert, &config_document("[{name: default}]")).expect("receiver is valid");

        let expected: Sequence = serde_yaml::from_str(indoc! {r##"
            - name: default
            - name: team-a_app
              slack_configs:
                - channel: "#team-a"
                  text: '<!here> {{ template "slack.default.text" . }}'
                  send_resolved: true
              email_configs:
                - to: team-a@example.com
        "##})
        .expect("test YAML is valid");
        assert_eq!(receivers, expected);
    }

    #[test]
    fn replace_existing_receiver_in_place() {
        let alert = alert(
            "team-a",
            "app",
            "receivers: {webhook: {url: 'https://hooks.example.com/alerts'}}",
        );
        let document = config_document(indoc! {r##"
            - name: default
            - name: team-a_app
              slack_configs:
                - channel: "#old"
            - name: team-b_app
        "##});

        let receivers = upsert(&alert, &document).expect("receiver is valid");

        assert_eq!(receivers.len(), 3);
        assert_eq!(
            receivers[1],
            serde_yaml::from_str::<Value>(
                "{name: team-a_app, webhook_configs: [{url: 'https://hooks.example.com/alerts'}]}"
            )
            .expect("test YAML is valid")
        );
        assert_eq!(document::string_field(&receivers[2], NAME_FIELD), Some("team-b_app"));
    }

    #[test]
    fn upsert_is_idempotent() {
        let alert = alert("team-a", "app", "receivers: {email: {to: a@example.com}}");
        let mut document = config_document("[]");

        let first = upsert(&alert, &document).expect("receiver is valid");
        document.set_receivers(first.clone());
        let second = upsert(&alert, &document).expect("receiver is valid");

        assert_eq!(first, second);
    }

    #[rstest]
    #[case::no_receiver("receivers: {}")]
    #[case::empty_channel("receivers: {slack: {channel: ' '}}")]
    #[case::email_without_at("receivers: {email: {to: team-a}}")]
    #[case::email_one_invalid("receivers: {email: {to: 'a@example.com, b'}}")]
    #[case::relative_url("receivers: {webhook: {url: /alerts}}")]
    #[case::ftp_url("receivers: {webhook: {url: 'ftp://example.com'}}")]
    fn invalid_receiver(#[case] spec: &str) {
        let alert = alert("team-a", "app", spec);

        let error = upsert(&alert, &config_document("[]")).expect_err("receiver is invalid");
        assert!(error.is_invalid_spec(), "unexpected error: {error}");
    }

    #[test]
    fn delete_receiver() {
        let alert = alert("team-a", "app", "{}");
        let document = config_document("[{name: default}, {name: team-a_app}, {name: team-b_app}]");

        let receivers = delete(&alert, &document).expect("document is valid");

        let names: Vec<_> = receivers
            .iter()
            .filter_map(|r| document::string_field(r, NAME_FIELD))
            .collect();
        assert_eq!(names, ["default", "team-b_app"]);
    }

    #[test]
    fn delete_unknown_receiver_is_noop() {
        let alert = alert("team-z", "never-added", "{}");
        let document = config_document("[{name: default}]");

        let receivers = delete(&alert, &document).expect("document is valid");

        assert_eq!(receivers, document.receivers().expect("valid").to_vec());
    }
}
