//! Computes the configuration document for adding, updating or deleting one [`Alert`].
//!
//! Nothing in here performs any I/O. The functions take the loaded documents and return the
//! document to persist, see [`crate::reconciler`] for the store-bound counterpart.

use std::collections::BTreeSet;

use serde_yaml::Value;
use snafu::{ResultExt, Snafu};
use strum::{AsRefStr, Display};
use tracing::debug;

use crate::{
    crd::{self, Alert, AlertKey},
    document::{self, Document},
    merge::{
        inhibition,
        receiver::{self, NAME_FIELD},
        route::{self, RECEIVER_FIELD},
    },
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("alert cannot be reconciled without name and namespace"))]
    InvalidAlert { source: crd::Error },

    #[snafu(display("failed to carry the {section} section forward"))]
    CarryForward {
        source: document::Error,
        section: &'static str,
    },

    #[snafu(display("failed to update the route section"))]
    UpsertRoute { source: route::Error },

    #[snafu(display("failed to update the receivers section"))]
    UpsertReceivers { source: receiver::Error },

    #[snafu(display("failed to update the inhibit_rules section"))]
    UpsertInhibitRules { source: inhibition::Error },

    #[snafu(display("failed to delete from the route section"))]
    DeleteRoute { source: route::Error },

    #[snafu(display("failed to delete from the receivers section"))]
    DeleteReceivers { source: receiver::Error },

    #[snafu(display("failed to delete from the inhibit_rules section"))]
    DeleteInhibitRules { source: inhibition::Error },
}

/// The category of a failed reconciliation, as reported in logs and by the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr, Display)]
pub enum FailureReason {
    ConfigUnavailable,
    RetrieveConfig,
    MalformedDocument,
    InvalidAlert,
    InvalidReceiverSpec,
    InvalidRouteSpec,
    InvalidInhibitionSpec,
    PersistFailed,
}

impl Error {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::InvalidAlert { .. } => FailureReason::InvalidAlert,
            Self::UpsertRoute { source } if source.is_invalid_spec() => {
                FailureReason::InvalidRouteSpec
            }
            Self::UpsertReceivers { source } if source.is_invalid_spec() => {
                FailureReason::InvalidReceiverSpec
            }
            Self::UpsertInhibitRules { source } if source.is_invalid_spec() => {
                FailureReason::InvalidInhibitionSpec
            }
            _ => FailureReason::MalformedDocument,
        }
    }
}

/// Builds the document for adding or updating `alert`.
///
/// The result is based on `template`. Alert-derived entries which only exist in `current` are
/// carried over, then the route, receiver and inhibition rules of `alert` are merged in, in that
/// order.
pub fn add_or_update(alert: &Alert, current: &Document, mut template: Document) -> Result<Document> {
    let key = alert.key().context(InvalidAlertSnafu)?;

    carry_forward(current, &mut template, &key)?;

    let route = route::upsert(alert, current, &template).context(UpsertRouteSnafu)?;
    template.set_route(route);

    let receivers = receiver::upsert(alert, &template).context(UpsertReceiversSnafu)?;
    template.set_receivers(receivers);

    let inhibit_rules = inhibition::upsert(alert, &template).context(UpsertInhibitRulesSnafu)?;
    template.set_inhibit_rules(inhibit_rules);

    Ok(template)
}

/// Builds the document with the route, receiver and inhibition rules of `alert` removed.
pub fn delete(alert: &Alert, mut current: Document) -> Result<Document> {
    alert.key().context(InvalidAlertSnafu)?;

    let route = route::delete(alert, &current).context(DeleteRouteSnafu)?;
    current.set_route(route);

    let receivers = receiver::delete(alert, &current).context(DeleteReceiversSnafu)?;
    current.set_receivers(receivers);

    let inhibit_rules = inhibition::delete(alert, &current).context(DeleteInhibitRulesSnafu)?;
    current.set_inhibit_rules(inhibit_rules);

    Ok(current)
}

/// Appends the Alert-derived entries of `current` which `template` lacks to `template`.
///
/// Routes and receivers are only carried for Alerts which have both a root level route and a
/// receiver in `current`. The route of `reconciled` is left to [`route::upsert`], which puts it
/// back at its previous position; its receiver and inhibition rules are carried so their upserts
/// replace them in place.
fn carry_forward(current: &Document, template: &mut Document, reconciled: &AlertKey) -> Result<()> {
    let current_routes = current.child_routes().context(CarryForwardSnafu {
        section: document::ROUTE,
    })?;
    let current_receivers = current.receivers().context(CarryForwardSnafu {
        section: document::RECEIVERS,
    })?;
    let routed: BTreeSet<AlertKey> = current_routes.iter().filter_map(route_key).collect();
    let alerts: BTreeSet<AlertKey> = current_receivers
        .iter()
        .filter_map(receiver_key)
        .filter(|key| routed.contains(key))
        .collect();

    let root = template.route().context(CarryForwardSnafu {
        section: document::ROUTE,
    })?;
    let mut children = document::child_routes(root)
        .context(CarryForwardSnafu {
            section: document::ROUTE,
        })?
        .to_vec();
    let routes = carried(current_routes, &children, route_key, |key| {
        key != reconciled && alerts.contains(key)
    });
    if !routes.is_empty() {
        debug!(count = routes.len(), "carrying routes forward");
        children.extend(routes);
        let route = document::with_child_routes(root, children);
        template.set_route(route);
    }

    let mut receivers = template
        .receivers()
        .context(CarryForwardSnafu {
            section: document::RECEIVERS,
        })?
        .to_vec();
    let carried_receivers = carried(current_receivers, &receivers, receiver_key, |key| {
        alerts.contains(key)
    });
    if !carried_receivers.is_empty() {
        debug!(count = carried_receivers.len(), "carrying receivers forward");
        receivers.extend(carried_receivers);
        template.set_receivers(receivers);
    }

    let current_rules = current.inhibit_rules().context(CarryForwardSnafu {
        section: document::INHIBIT_RULES,
    })?;
    let mut inhibit_rules = template
        .inhibit_rules()
        .context(CarryForwardSnafu {
            section: document::INHIBIT_RULES,
        })?
        .to_vec();
    let carried_rules = carried(current_rules, &inhibit_rules, inhibition::owner, |_| true);
    if !carried_rules.is_empty() {
        debug!(count = carried_rules.len(), "carrying inhibition rules forward");
        inhibit_rules.extend(carried_rules);
        template.set_inhibit_rules(inhibit_rules);
    }

    Ok(())
}

fn route_key(route: &Value) -> Option<AlertKey> {
    document::string_field(route, RECEIVER_FIELD).and_then(AlertKey::parse)
}

fn receiver_key(receiver: &Value) -> Option<AlertKey> {
    document::string_field(receiver, NAME_FIELD).and_then(AlertKey::parse)
}

/// Selects the entries of `current` belonging to an Alert accepted by `carry` which has no entry
/// in `template` yet.
fn carried(
    current: &[Value],
    template: &[Value],
    key_of: impl Fn(&Value) -> Option<AlertKey>,
    carry: impl Fn(&AlertKey) -> bool,
) -> Vec<Value> {
    let present: BTreeSet<AlertKey> = template.iter().filter_map(&key_of).collect();

    current
        .iter()
        .filter(|entry| key_of(entry).is_some_and(|key| carry(&key) && !present.contains(&key)))
        .cloned()
        .collect()
}
