use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client, api::PostParams};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::store::{
    ConfigMapNotFoundSnafu, ConfigStore, Error, GetConfigMapSnafu, ReplaceConfigMapSnafu,
};

/// The field manager recorded for every write to a ConfigMap.
pub const FIELD_MANAGER: &str = "alerterator";

/// A [`ConfigStore`] reading and writing the documents as the value of `key` in ConfigMaps of a
/// single namespace.
///
/// Writes replace the whole ConfigMap with the `resourceVersion` read right before, so a write
/// fails instead of overwriting a concurrent change.
#[derive(Clone)]
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    key: String,
    post_params: PostParams,
}

impl ConfigMapStore {
    pub fn new(client: Client, namespace: &str, key: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            key: key.into(),
            post_params: PostParams {
                field_manager: Some(FIELD_MANAGER.to_owned()),
                ..PostParams::default()
            },
        }
    }
}

#[async_trait]
impl ConfigStore for ConfigMapStore {
    async fn get(&self, name: &str) -> Result<Option<String>, Error> {
        let config_map = self
            .api
            .get_opt(name)
            .await
            .context(GetConfigMapSnafu { name })?;

        let raw = config_map
            .and_then(|config_map| config_map.data)
            .and_then(|mut data| data.remove(&self.key))
            .filter(|raw| !raw.trim().is_empty());
        debug!(config_map = name, key = %self.key, found = raw.is_some(), "read document");

        Ok(raw)
    }

    async fn put(&self, name: &str, raw: String) -> Result<(), Error> {
        let mut config_map = self
            .api
            .get_opt(name)
            .await
            .context(GetConfigMapSnafu { name })?
            .context(ConfigMapNotFoundSnafu { name })?;

        config_map
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(self.key.clone(), raw);

        self.api
            .replace(name, &self.post_params, &config_map)
            .await
            .context(ReplaceConfigMapSnafu { name })?;
        debug!(config_map = name, key = %self.key, "replaced document");

        Ok(())
    }
}
