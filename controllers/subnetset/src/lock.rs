//! Resource lock registry.
//!
//! One reader/writer lock per identity (a SubnetSet UID or a backend Subnet
//! path), created on first use. Guards are owned and release on drop.
//!
//! An entry is only ever removed while nobody holds or waits on its lock:
//! every holder and waiter owns a clone of the `Arc`, so a strong count of one
//! means the map is the sole owner. Without that check a sweep could drop an
//! entry while a waiter is queued on it and the next caller would get a fresh,
//! unrelated lock for the same identity.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Shared hold on an identity
pub type ReadGuard = OwnedRwLockReadGuard<()>;

/// Exclusive hold on an identity
pub type WriteGuard = OwnedRwLockWriteGuard<()>;

/// Lazily populated map of identity to lock
#[derive(Debug, Default)]
pub struct ResourceLockRegistry {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ResourceLockRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Waits for a shared hold on `id`
    pub async fn acquire_read(&self, id: &str) -> ReadGuard {
        self.entry(id).read_owned().await
    }

    /// Waits for an exclusive hold on `id`
    pub async fn acquire_write(&self, id: &str) -> WriteGuard {
        self.entry(id).write_owned().await
    }

    /// Drops entries whose identity is not in `live` and that nobody holds or
    /// waits on. Returns the number of entries removed.
    pub fn retain_live(&self, live: &HashSet<String>) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|id, lock| live.contains(id) || Arc::strong_count(lock) > 1);
        let removed = before - locks.len();
        if removed > 0 {
            debug!(removed, remaining = locks.len(), "Reclaimed idle resource locks");
        }
        removed
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when the registry holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
