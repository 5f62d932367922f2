//! Primary store with a best-effort mirror

use crate::error::StoreError;
use crate::repository::ObjectStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Reads come from the primary. Writes and deletes hit the primary first and
/// are then replayed on the mirror; a mirror failure is logged, never fatal.
pub struct MirroredObjectStore {
    primary: Arc<dyn ObjectStore>,
    mirror: Arc<dyn ObjectStore>,
}

impl MirroredObjectStore {
    pub fn new(primary: Arc<dyn ObjectStore>, mirror: Arc<dyn ObjectStore>) -> Self {
        Self { primary, mirror }
    }
}

#[async_trait]
impl ObjectStore for MirroredObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.primary.get(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.primary.put(key, data.clone()).await?;
        if let Err(e) = self.mirror.put(key, data).await {
            warn!(key = %key, mirror = %self.mirror.describe(), error = %e, "Mirror write failed");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.primary.delete(key).await?;
        if let Err(e) = self.mirror.delete(key).await {
            warn!(key = %key, mirror = %self.mirror.describe(), error = %e, "Mirror delete failed");
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.primary.list(prefix).await
    }

    fn describe(&self) -> String {
        format!("{} (mirror {})", self.primary.describe(), self.mirror.describe())
    }
}
