//! Versioned bundle repository over any [`ObjectStore`]
//!
//! Layout per role:
//!
//! ```text
//! <role>/HEAD                          -> "<version>"
//! <role>/<version>/classifier.json
//! <role>/<version>/transform.json
//! <role>/<version>/threshold.json
//! <role>/<version>/quality_score.json
//! ```
//!
//! A version directory is written completely before `HEAD` is pointed at it,
//! and a superseded version is only removed after the flip. Since `HEAD` is a
//! single object, the flip is the commit point.

use crate::error::{RepositoryError, StoreError};
use crate::models::codec::{self, ScalarArtifact};
use crate::models::{ModelBundle, StoredBundle};
use crate::repository::{ArtifactRepository, ObjectStore, Role};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts a fetch makes when `HEAD` moves underneath it
const FETCH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Classifier,
    Transform,
    Threshold,
    QualityScore,
}

const COMPONENTS: [Component; 4] = [
    Component::Classifier,
    Component::Transform,
    Component::Threshold,
    Component::QualityScore,
];

impl Component {
    fn name(&self) -> &'static str {
        match self {
            Component::Classifier => "classifier",
            Component::Transform => "transform",
            Component::Threshold => "threshold",
            Component::QualityScore => "quality_score",
        }
    }
}

fn head_key(role: Role) -> String {
    format!("{}/HEAD", role)
}

fn version_prefix(role: Role, version: &str) -> String {
    format!("{}/{}/", role, version)
}

fn component_key(role: Role, version: &str, component: Component) -> String {
    format!("{}{}.json", version_prefix(role, version), component.name())
}

/// Sortable, unique version id, e.g. `20260101T120000.123Z-1a2b3c4d`
fn new_version() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
        &id[..8]
    )
}

fn invalid(key: String, reason: impl ToString) -> RepositoryError {
    RepositoryError::InvalidArtifact {
        key,
        reason: reason.to_string(),
    }
}

pub struct BundleRepository {
    store: Arc<dyn ObjectStore>,
}

impl BundleRepository {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store_handle(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn head(&self, role: Role) -> Result<Option<String>, RepositoryError> {
        let key = head_key(role);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let version = String::from_utf8(bytes).map_err(|e| invalid(key.clone(), e))?;
        let version = version.trim();
        if version.is_empty() || version.contains('/') {
            return Err(invalid(key, "empty or malformed version pointer"));
        }
        Ok(Some(version.to_string()))
    }

    async fn read_component(
        &self,
        role: Role,
        version: &str,
        component: Component,
    ) -> Result<Vec<u8>, RepositoryError> {
        self.store
            .get(&component_key(role, version, component))
            .await?
            .ok_or_else(|| RepositoryError::IncompleteArtifact {
                role,
                component: component.name().to_string(),
            })
    }

    async fn read_version(
        &self,
        role: Role,
        version: &str,
    ) -> Result<[Vec<u8>; 4], RepositoryError> {
        let (classifier, transform, threshold, score) = futures::try_join!(
            self.read_component(role, version, Component::Classifier),
            self.read_component(role, version, Component::Transform),
            self.read_component(role, version, Component::Threshold),
            self.read_component(role, version, Component::QualityScore),
        )?;
        Ok([classifier, transform, threshold, score])
    }

    fn decode(role: Role, version: &str, parts: &[Vec<u8>; 4]) -> Result<ModelBundle, RepositoryError> {
        let key = |c| component_key(role, version, c);

        let classifier =
            codec::decode_classifier(&parts[0]).map_err(|e| invalid(key(Component::Classifier), e))?;
        let transform =
            codec::decode_transform(&parts[1]).map_err(|e| invalid(key(Component::Transform), e))?;
        let threshold =
            codec::decode_scalar(&parts[2]).map_err(|e| invalid(key(Component::Threshold), e))?;
        let score =
            codec::decode_scalar(&parts[3]).map_err(|e| invalid(key(Component::QualityScore), e))?;

        ModelBundle::new(classifier, transform, threshold, score)
            .map_err(|e| invalid(version_prefix(role, version), e))
    }

    fn encode(bundle: &ModelBundle) -> Result<[Vec<u8>; 4], RepositoryError> {
        let err = |c: Component| move |e: serde_json::Error| invalid(c.name().to_string(), e);
        Ok([
            codec::encode(&bundle.classifier().to_artifact()).map_err(err(Component::Classifier))?,
            codec::encode(&bundle.transform().to_artifact()).map_err(err(Component::Transform))?,
            codec::encode(&ScalarArtifact {
                value: bundle.threshold(),
            })
            .map_err(err(Component::Threshold))?,
            codec::encode(&ScalarArtifact {
                value: bundle.quality_score(),
            })
            .map_err(err(Component::QualityScore))?,
        ])
    }

    /// Write every component of a new version, then point `HEAD` at it.
    ///
    /// On any failure the partial version is removed and `HEAD` is untouched.
    async fn commit_version(&self, role: Role, parts: [Vec<u8>; 4]) -> Result<String, RepositoryError> {
        let version = new_version();

        let mut written: Result<(), StoreError> = Ok(());
        for (component, bytes) in COMPONENTS.iter().zip(parts) {
            written = self
                .store
                .put(&component_key(role, &version, *component), bytes)
                .await;
            if written.is_err() {
                break;
            }
        }
        if written.is_ok() {
            written = self.store.put(&head_key(role), version.clone().into_bytes()).await;
        }

        if let Err(e) = written {
            warn!(role = %role, version = %version, error = %e, "Commit failed, removing staged version");
            self.remove_version(role, &version).await;
            return Err(e.into());
        }

        Ok(version)
    }

    /// Best-effort removal of every version of `role` other than `keep`.
    ///
    /// Covers the superseded version as well as staged versions left behind
    /// by a commit that was interrupted before its own cleanup ran.
    async fn prune(&self, role: Role, keep: &str) {
        let role_prefix = format!("{}/", role);
        let keys = match self.store.list(&role_prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(role = %role, error = %e, "Could not list versions for cleanup");
                return;
            }
        };

        let head = head_key(role);
        let kept = version_prefix(role, keep);
        for key in keys {
            if key == head || key.starts_with(&kept) {
                continue;
            }
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Could not remove superseded artifact");
            }
        }
    }

    /// Best-effort removal of one version directory.
    async fn remove_version(&self, role: Role, version: &str) {
        let prefix = version_prefix(role, version);
        let keys = match self.store.list(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Could not list version for cleanup");
                return;
            }
        };
        for key in keys {
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Could not remove superseded artifact");
            }
        }
    }
}

#[async_trait]
impl ArtifactRepository for BundleRepository {
    async fn fetch(&self, role: Role) -> Result<StoredBundle, RepositoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let version = self.head(role).await?.ok_or(RepositoryError::NotFound(role))?;

            match self.read_version(role, &version).await {
                Ok(parts) => {
                    let bundle = Self::decode(role, &version, &parts)?;
                    debug!(role = %role, version = %version, "Fetched bundle");
                    return Ok(StoredBundle { version, bundle });
                }
                Err(err @ RepositoryError::IncompleteArtifact { .. }) => {
                    // A concurrent commit may have retired this version; only
                    // retry if the pointer actually moved.
                    let current = self.head(role).await?;
                    if attempt >= FETCH_ATTEMPTS || current.as_deref() == Some(version.as_str()) {
                        return Err(err);
                    }
                    debug!(role = %role, stale = %version, "HEAD moved during fetch, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn store(&self, role: Role, bundle: &ModelBundle) -> Result<String, RepositoryError> {
        let parts = Self::encode(bundle)?;
        let version = self.commit_version(role, parts).await?;
        self.prune(role, &version).await;

        info!(
            role = %role,
            version = %version,
            threshold = bundle.threshold(),
            quality_score = bundle.quality_score(),
            "Stored bundle"
        );
        Ok(version)
    }

    async fn promote(&self, from: Role, to: Role) -> Result<String, RepositoryError> {
        let source = self.head(from).await?.ok_or(RepositoryError::NotFound(from))?;
        let parts = self.read_version(from, &source).await?;
        // refuse to commit something that would not load
        Self::decode(from, &source, &parts)?;

        let version = self.commit_version(to, parts).await?;

        // the new version is durable; retire everything else and the source
        self.prune(to, &version).await;
        if let Err(e) = self.discard(from).await {
            warn!(role = %from, error = %e, "Promoted, but source artifacts could not be removed");
        }

        info!(from = %from, to = %to, source_version = %source, version = %version, "Promoted bundle");
        Ok(version)
    }

    async fn discard(&self, role: Role) -> Result<(), RepositoryError> {
        // drop the pointer first so readers see NotFound rather than a torn set
        self.store.delete(&head_key(role)).await?;
        for key in self.store.list(&format!("{}/", role)).await? {
            self.store.delete(&key).await?;
        }
        info!(role = %role, "Discarded artifact set");
        Ok(())
    }

    async fn version(&self, role: Role) -> Result<Option<String>, RepositoryError> {
        self.head(role).await
    }

    async fn contains(&self, role: Role) -> Result<bool, RepositoryError> {
        Ok(self.head(role).await?.is_some())
    }

    async fn quality_score(&self, role: Role) -> Result<Option<f64>, RepositoryError> {
        let Some(version) = self.head(role).await? else {
            return Ok(None);
        };
        let bytes = self
            .read_component(role, &version, Component::QualityScore)
            .await?;
        codec::decode_scalar(&bytes)
            .map(Some)
            .map_err(|e| invalid(component_key(role, &version, Component::QualityScore), e))
    }
}
