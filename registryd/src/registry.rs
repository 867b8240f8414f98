//! Registry adapter: maps `<base>/<service>/<address>` keys in the
//! key-value store to `Service` records and back.

use std::sync::Arc;
use thiserror::Error;
use shared::protocol::{FIELD_GROUP, FIELD_STATE, STATE_ACTIVE, STATE_INACTIVE};
use shared::types::Service;

use crate::id::encode_id;
use crate::metadata::{Metadata, MetadataError};
use crate::store::{KvPair, KvStore, StoreError, WriteOptions};

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Malformed metadata at {key}: {source}")]
    Parse {
        key: String,
        #[source]
        source: MetadataError,
    },
}

pub struct Registry {
    store: Arc<dyn KvStore>,
    base_path: String,
}

impl Registry {
    /// `base_path` is kept as given, minus any trailing `/`
    pub fn new(store: Arc<dyn KvStore>, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into().trim_end_matches('/').to_string();
        Self { store, base_path }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Storage key of one endpoint
    pub fn endpoint_key(&self, name: &str, address: &str) -> String {
        let name = name.trim_matches('/');
        let address = address.trim_matches('/');
        if self.base_path.is_empty() {
            format!("{}/{}", name, address)
        } else {
            format!("{}/{}/{}", self.base_path, name, address)
        }
    }

    /// List every endpoint under the base path. Branches that fail to list
    /// and endpoints whose value does not parse are logged and left out.
    /// Containers below the endpoint level are not endpoints and are skipped.
    pub async fn fetch_services(&self) -> Vec<Service> {
        let mut services = Vec::new();

        let containers = match self.store.list(&self.base_path).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!("Failed to list services {}: {}", self.base_path, e);
                return services;
            }
        };

        for container in containers {
            let endpoints = match self.store.list(&container.key).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::error!("Failed to list {}: {}", container.key, e);
                    continue;
                }
            };

            services.extend(
                endpoints
                    .iter()
                    .filter(|pair| !pair.is_dir)
                    .filter_map(|pair| self.to_service(pair)),
            );
        }

        tracing::debug!("Fetched {} endpoints under {}", services.len(), self.base_path);
        services
    }

    pub async fn deactivate_service(&self, name: &str, address: &str) -> Result<()> {
        self.set_state(name, address, STATE_INACTIVE).await
    }

    pub async fn activate_service(&self, name: &str, address: &str) -> Result<()> {
        self.set_state(name, address, STATE_ACTIVE).await
    }

    /// Overwrite the stored value with `metadata` as-is. Fields the caller
    /// leaves out, `state` and `group` included, are gone afterwards.
    pub async fn update_metadata(&self, name: &str, address: &str, metadata: &str) -> Result<()> {
        let key = self.endpoint_key(name, address);
        self.store
            .put(&key, metadata.as_bytes(), WriteOptions { is_dir: false })
            .await
            .inspect_err(|e| tracing::error!("Failed to write metadata to {}: {}", key, e))?;

        tracing::info!("Updated metadata of {}", key);
        Ok(())
    }

    /// Read-modify-write of the `state` field. The write is conditional on
    /// the version read, so a concurrent writer turns into a Conflict error.
    async fn set_state(&self, name: &str, address: &str, state: &str) -> Result<()> {
        let key = self.endpoint_key(name, address);
        let pair = self.store.get(&key).await?;

        let mut metadata = Metadata::parse_bytes(&pair.value).map_err(|source| {
            tracing::warn!("Value of {} does not parse: {}", key, source);
            RegistryError::Parse {
                key: key.clone(),
                source,
            }
        })?;
        metadata.set(FIELD_STATE, state);

        self.store
            .put_if_version(&pair.key, metadata.encode().as_bytes(), pair.version)
            .await
            .inspect_err(|e| tracing::error!("Failed to write state to {}: {}", key, e))?;

        tracing::info!("Set {} to {}", key, state);
        Ok(())
    }

    fn to_service(&self, pair: &KvPair) -> Option<Service> {
        let (name, address) = self.split_endpoint_key(&pair.key);

        let metadata = match Metadata::parse_bytes(&pair.value) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping {}: value does not parse: {}", pair.key, e);
                return None;
            }
        };

        let state = metadata
            .get(FIELD_STATE)
            .filter(|state| !state.is_empty())
            .unwrap_or(STATE_ACTIVE);
        let group = metadata.get(FIELD_GROUP).unwrap_or_default();

        Some(Service {
            id: encode_id(name, address),
            name: name.to_string(),
            address: address.to_string(),
            metadata: String::from_utf8_lossy(&pair.value).into_owned(),
            state: state.to_string(),
            group: group.to_string(),
        })
    }

    /// Name is what sits between the base path and the last `/`,
    /// address is the last segment.
    fn split_endpoint_key<'a>(&self, key: &'a str) -> (&'a str, &'a str) {
        let (parent, address) = key.rsplit_once('/').unwrap_or(("", key));
        let name = parent.strip_prefix(self.base_path.as_str()).unwrap_or(parent);
        let name = name.strip_prefix('/').unwrap_or(name);
        (name, address)
    }
}
