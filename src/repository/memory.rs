//! In-process object store with fault injection

use crate::error::StoreError;
use crate::repository::ObjectStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// Object store backed by a sorted map.
///
/// Useful for tests and for running the service without persistent storage.
/// Faults can be injected to simulate an unreachable backend or a write that
/// fails partway through a multi-object operation.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Remaining successful puts before puts start failing
    puts_remaining: Mutex<Option<usize>>,
    offline: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more puts, then fail every put until [`Self::heal`].
    pub fn fail_puts_after(&self, n: usize) {
        *self.puts_remaining.lock().unwrap_or_else(PoisonError::into_inner) = Some(n);
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Clear all injected faults.
    pub fn heal(&self) {
        *self.puts_remaining.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.set_offline(false);
    }

    /// Snapshot of every stored key
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.check_online()?;
        {
            let mut remaining = self.puts_remaining.lock().unwrap_or_else(PoisonError::into_inner);
            match remaining.as_mut() {
                Some(0) => {
                    return Err(StoreError::Unavailable(format!(
                        "injected write failure for {}",
                        key
                    )))
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
