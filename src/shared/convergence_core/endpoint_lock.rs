use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub const CATEGORY_STORAGE: &str = "storage";
pub const CATEGORY_RESET: &str = "reset";
pub const CATEGORY_ATTRIBUTES: &str = "attributes";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey {
    pub target: String,
    pub category: String,
}

impl LockKey {
    /// Targets compare case-insensitively and without a trailing slash, so
    /// `https://BMC/` and `https://bmc` share one lock.
    pub fn new(target: &str, category: &str) -> Self {
        Self {
            target: target.trim().trim_end_matches('/').to_ascii_lowercase(),
            category: category.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.category, self.target)
    }
}

#[derive(Debug, Default)]
pub struct EndpointLockRegistry {
    locks: StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl EndpointLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until nobody else holds `key`. No timeout and no fairness
    /// promise beyond what the underlying mutex gives.
    pub async fn acquire(&self, key: LockKey) -> EndpointLockGuard {
        let slot = self.slot(&key);
        if slot.try_lock().is_err() {
            debug!(lock = %key, "waiting for endpoint lock");
        }
        let guard = slot.lock_owned().await;
        debug!(lock = %key, "endpoint lock acquired");
        EndpointLockGuard { key, _guard: guard }
    }

    pub fn try_acquire(&self, key: LockKey) -> Option<EndpointLockGuard> {
        let guard = self.slot(&key).try_lock_owned().ok()?;
        debug!(lock = %key, "endpoint lock acquired");
        Some(EndpointLockGuard { key, _guard: guard })
    }

    pub fn release(&self, guard: EndpointLockGuard) {
        drop(guard);
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(key)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    fn slot(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

#[derive(Debug)]
pub struct EndpointLockGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl EndpointLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for EndpointLockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.key, "endpoint lock released");
    }
}
