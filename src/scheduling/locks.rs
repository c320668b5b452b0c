//! In-process serialization points keyed by dentist license / patient identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::ServiceError;

pub fn dentist_key(license: &str) -> String {
    format!("dentist:{license}")
}

pub fn patient_key(identity: &str) -> String {
    format!("patient:{identity}")
}

/// Times a writer re-locks after the record it read moved to other keys.
pub const RELOCK_ATTEMPTS: usize = 3;

/// Sorted, de-duplicated key set. Every holder acquires in this order.
pub fn key_set(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();
    keys
}

#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Releases every key when dropped.
#[derive(Debug)]
pub struct KeyGuard {
    _held: Vec<OwnedMutexGuard<()>>,
}

impl LockTable {
    /// Acquires `keys` in order. `keys` must come from [`key_set`].
    pub async fn acquire(&self, keys: &[String]) -> KeyGuard {
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            held.push(self.slot(key).lock_owned().await);
        }
        KeyGuard { _held: held }
    }

    pub async fn acquire_within(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<KeyGuard, ServiceError> {
        tokio::time::timeout(timeout, self.acquire(keys))
            .await
            .map_err(|_| {
                tracing::warn!(?keys, "timed out waiting for scheduling lock");
                ServiceError::Transient("scheduling is busy, try again".into())
            })
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // drop slots nobody holds or waits on
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        slots.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
