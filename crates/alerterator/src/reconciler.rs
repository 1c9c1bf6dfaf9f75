//! Runs a reconciliation against a [`ConfigStore`]: load, compute, persist.
//!
//! Every call is a single get, compute and put sequence. Nothing is written unless the whole
//! computation succeeded and changed the document.

use kube::runtime::reflector::ObjectRef;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, instrument};

use crate::{
    crd::Alert,
    document::{self, Document},
    reconcile::{self, FailureReason},
    store::{self, ConfigStore},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("configuration document {name:?} is missing or empty"))]
    ConfigUnavailable { name: String },

    #[snafu(display("failed to retrieve configuration document {name:?}"))]
    RetrieveConfig { source: store::Error, name: String },

    #[snafu(display("configuration document {name:?} is malformed"))]
    MalformedDocument {
        source: document::Error,
        name: String,
    },

    #[snafu(display("failed to reconcile {alert}"))]
    Reconcile {
        source: reconcile::Error,
        alert: ObjectRef<Alert>,
    },

    #[snafu(display("failed to serialize configuration document {name:?}"))]
    SerializeDocument {
        source: document::Error,
        name: String,
    },

    #[snafu(display("failed to persist configuration document {name:?}"))]
    PersistFailed { source: store::Error, name: String },
}

impl Error {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::ConfigUnavailable { .. } => FailureReason::ConfigUnavailable,
            Self::RetrieveConfig { .. } => FailureReason::RetrieveConfig,
            Self::MalformedDocument { .. } | Self::SerializeDocument { .. } => {
                FailureReason::MalformedDocument
            }
            Self::Reconcile { source, .. } => source.reason(),
            Self::PersistFailed { .. } => FailureReason::PersistFailed,
        }
    }
}

/// The result of a successful reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    /// The document changed and was written back.
    Updated,

    /// The document already was up to date, nothing was written.
    Unchanged,
}

/// Reconciles [`Alert`]s into the configuration document `config_name`, using the document
/// `template_name` as base.
pub struct Reconciler<S> {
    store: S,
    config_name: String,
    template_name: String,
}

impl<S: ConfigStore> Reconciler<S> {
    pub fn new(store: S, config_name: impl Into<String>, template_name: impl Into<String>) -> Self {
        Self {
            store,
            config_name: config_name.into(),
            template_name: template_name.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    /// Adds `alert` to the configuration or updates its entries.
    #[instrument(skip_all, fields(alert = %ObjectRef::from_obj(alert)))]
    pub async fn add_or_update(&self, alert: &Alert) -> Result<Outcome> {
        let current = self.load(&self.config_name).await?;
        let template = self.load(&self.template_name).await?;

        let updated = reconcile::add_or_update(alert, &current, template)
            .context(ReconcileSnafu {
                alert: ObjectRef::from_obj(alert),
            })?;

        self.persist(&current, &updated).await
    }

    /// Removes all entries of `alert` from the configuration.
    #[instrument(skip_all, fields(alert = %ObjectRef::from_obj(alert)))]
    pub async fn delete(&self, alert: &Alert) -> Result<Outcome> {
        let current = self.load(&self.config_name).await?;

        let updated = reconcile::delete(alert, current.clone()).context(ReconcileSnafu {
            alert: ObjectRef::from_obj(alert),
        })?;

        self.persist(&current, &updated).await
    }

    async fn load(&self, name: &str) -> Result<Document> {
        let raw = self
            .store
            .get(name)
            .await
            .context(RetrieveConfigSnafu { name })?
            .context(ConfigUnavailableSnafu { name })?;

        Document::parse(&raw).context(MalformedDocumentSnafu { name })
    }

    async fn persist(&self, current: &Document, updated: &Document) -> Result<Outcome> {
        let name = &self.config_name;
        if updated == current {
            info!(config = %name, "configuration is up to date");
            return Ok(Outcome::Unchanged);
        }

        let raw = updated
            .to_yaml()
            .context(SerializeDocumentSnafu { name })?;
        self.store
            .put(name, raw)
            .await
            .context(PersistFailedSnafu { name })?;

        info!(config = %name, "updated configuration");
        Ok(Outcome::Updated)
    }
}
