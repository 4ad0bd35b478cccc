//! Permission cache and per-path locks

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

use crate::model::Permissions;

/// Path to decoded record, invalidated around every write.
pub struct PermissionCache {
    map: DashMap<String, Permissions>,
    capacity: usize,
}

impl PermissionCache {
    pub fn new(capacity: usize) -> Self {
        PermissionCache { map: DashMap::new(), capacity }
    }

    pub fn get(&self, path: &str) -> Option<Permissions> {
        self.map.get(path).map(|e| e.value().clone())
    }

    pub fn insert(&self, path: &str, perms: Permissions) {
        if self.capacity == 0 {
            return;
        }
        if self.map.len() >= self.capacity && !self.map.contains_key(path) {
            // shard guards must be released before removing
            let victim = self.map.iter().next().map(|e| e.key().clone());
            if let Some(k) = victim {
                self.map.remove(&k);
            }
        }
        self.map.insert(path.to_string(), perms);
    }

    pub fn evict(&self, path: &str) {
        self.map.remove(path);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One reentrant lock per key, so nested cleanup writes on the same path
/// from inside a locked mutation do not deadlock.
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<ReentrantMutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    pub fn with<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.entry(key.to_string()).or_default().value());
        let _guard = lock.lock();
        f()
    }
}
