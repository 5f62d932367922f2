//! Artifact storage: object store backends and the bundle repository on top

pub mod bundles;
pub mod local;
pub mod memory;
pub mod mirror;
pub mod remote;
pub mod retry;

pub use bundles::BundleRepository;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use mirror::MirroredObjectStore;
pub use remote::RemoteObjectStore;
pub use retry::RetryPolicy;

use crate::config::{RepositoryBackend, RepositoryConfig};
use crate::error::{RepositoryError, StoreError};
use crate::models::{ModelBundle, StoredBundle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Slot an artifact set occupies in the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The deployed bundle; at most one exists
    Champion,
    /// A freshly trained bundle awaiting comparison
    Candidate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Champion => "champion",
            Role::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat key/value blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write an object. A single put is atomic to readers.
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Durable storage of complete model bundles by role.
///
/// Readers never observe a mix of components from two bundles, and a failed
/// write leaves the previously stored bundle fetchable.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Load all four components of `role`.
    async fn fetch(&self, role: Role) -> Result<StoredBundle, RepositoryError>;

    /// Persist `bundle` under `role`, replacing whatever was there. Returns the new version.
    async fn store(&self, role: Role, bundle: &ModelBundle) -> Result<String, RepositoryError>;

    /// Make the bundle stored under `from` the bundle stored under `to`, then
    /// remove `from`. Returns the new version of `to`.
    async fn promote(&self, from: Role, to: Role) -> Result<String, RepositoryError>;

    /// Delete every artifact of `role`. Idempotent.
    async fn discard(&self, role: Role) -> Result<(), RepositoryError>;

    /// Version currently committed under `role`, if any.
    async fn version(&self, role: Role) -> Result<Option<String>, RepositoryError>;

    /// Whether an artifact set is currently committed under `role`.
    async fn contains(&self, role: Role) -> Result<bool, RepositoryError>;

    /// Recorded quality score of `role`, without loading the estimators.
    async fn quality_score(&self, role: Role) -> Result<Option<f64>, RepositoryError>;
}

/// Build the object store described by `config`.
pub fn open_store(config: &RepositoryConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    let remote = || {
        RemoteObjectStore::new(
            &config.remote,
            RetryPolicy::from_config(&config.retry),
            Duration::from_millis(config.retry.request_timeout_ms),
        )
    };

    let store: Arc<dyn ObjectStore> = match config.backend {
        RepositoryBackend::Remote => Arc::new(remote()?),
        RepositoryBackend::Local if config.mirror_to_remote => Arc::new(MirroredObjectStore::new(
            Arc::new(LocalObjectStore::new(&config.local_dir)),
            Arc::new(remote()?),
        )),
        RepositoryBackend::Local => Arc::new(LocalObjectStore::new(&config.local_dir)),
    };

    info!(store = %store.describe(), "Artifact store opened");
    Ok(store)
}

/// Build the bundle repository described by `config`.
pub fn open_repository(config: &RepositoryConfig) -> Result<Arc<BundleRepository>, StoreError> {
    Ok(Arc::new(BundleRepository::new(open_store(config)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Champion.to_string(), "champion");
        assert_eq!(serde_json::to_string(&Role::Candidate).unwrap(), "\"candidate\"");
    }

    #[test]
    fn test_open_store_backends() {
        let mut config = RepositoryConfig {
            local_dir: PathBuf::from("/tmp/fraud-artifacts"),
            ..RepositoryConfig::default()
        };
        assert_eq!(
            open_store(&config).unwrap().describe(),
            "local:/tmp/fraud-artifacts"
        );

        config.mirror_to_remote = true;
        assert!(open_store(&config).unwrap().describe().contains("mirror remote:"));

        config.backend = RepositoryBackend::Remote;
        assert_eq!(
            open_store(&config).unwrap().describe(),
            "remote:http://localhost:9000/fraud-models"
        );
    }
}
