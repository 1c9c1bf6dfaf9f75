//! Storage of raw configuration documents.
//!
//! The live Alertmanager configuration and its template are stored as one key of a
//! [`ConfigMap`](k8s_openapi::api::core::v1::ConfigMap) each, see [`ConfigMapStore`].
//! [`MemoryStore`] keeps documents in memory and is used to render documents offline and in tests.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use snafu::{Snafu, ensure};

pub use crate::store::config_map::ConfigMapStore;

mod config_map;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get ConfigMap {name:?}"))]
    GetConfigMap { source: kube::Error, name: String },

    #[snafu(display("ConfigMap {name:?} does not exist"))]
    ConfigMapNotFound { name: String },

    #[snafu(display("failed to replace ConfigMap {name:?}"))]
    ReplaceConfigMap { source: kube::Error, name: String },

    #[snafu(display("document {name:?} cannot be written, the store is read-only"))]
    ReadOnly { name: String },
}

/// Loads and saves raw configuration documents by name.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns the document stored under `name`, or [`None`] if there is none or it is empty.
    async fn get(&self, name: &str) -> Result<Option<String>, Error>;

    /// Overwrites the document stored under `name`.
    async fn put(&self, name: &str, raw: String) -> Result<(), Error>;
}

/// A [`ConfigStore`] keeping documents in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, String>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the document `raw` under `name`.
    pub fn with_document(self, name: impl Into<String>, raw: impl Into<String>) -> Self {
        self.lock().insert(name.into(), raw.into());
        self
    }

    /// Makes every [`ConfigStore::put`] fail with [`Error::ReadOnly`].
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns the document currently stored under `name`.
    pub fn document(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .lock()
            .get(name)
            .filter(|raw| !raw.trim().is_empty())
            .cloned())
    }

    async fn put(&self, name: &str, raw: String) -> Result<(), Error> {
        ensure!(!self.read_only, ReadOnlySnafu { name });
        self.lock().insert(name.to_owned(), raw);
        Ok(())
    }
}
