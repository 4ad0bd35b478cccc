//! Key/value persistence

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::error::{err, Result};
use crate::keys::Key;

/// Byte store backing every record and index.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Returns whether the key existed.
    fn remove(&self, key: &str) -> Result<bool>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn keys(&self) -> Result<Vec<String>> {
        self.keys_with_prefix("")
    }
}

/// LMDB-backed store, one named database, one transaction per call.
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl LmdbStore {
    /// Open (creating if needed) the environment at `path`
    pub fn open(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path).map_err(err)? };
        let mut tx = env.write_txn().map_err(err)?;
        let db = env.create_database(&mut tx, Some("records")).map_err(err)?;
        tx.commit().map_err(err)?;
        Ok(LmdbStore { env, db })
    }

    /// Open with the map size from `config`.
    pub fn open_with(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        Self::open(path, config.map_size)
    }

    /// Execute a read-only operation
    fn read<T, F: FnOnce(&RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        f(&self.env.read_txn().map_err(err)?)
    }

    /// Execute a write operation and commit
    fn write<T, F: FnOnce(&mut RwTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = self.env.write_txn().map_err(err)?;
        let r = f(&mut tx)?;
        tx.commit().map_err(err)?;
        Ok(r)
    }
}

impl Store for LmdbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read(|tx| Ok(self.db.get(tx, key).map_err(err)?.map(<[u8]>::to_vec)))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write(|tx| self.db.put(tx, key, value).map_err(err))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.write(|tx| self.db.delete(tx, key).map_err(err))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.read(|tx| {
            let mut r = Vec::new();
            for item in self.db.prefix_iter(tx, prefix).map_err(err)? {
                let (k, _) = item.map_err(err)?;
                r.push(k.to_string());
            }
            Ok(r)
        })
    }
}

/// Ordered in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.map.read();
        Ok(map
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Read and decode a JSON value.
pub(crate) fn load<T: DeserializeOwned>(store: &dyn Store, key: &Key<'_>) -> Result<Option<T>> {
    match store.get(&key.to_string())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn save<T: Serialize + ?Sized>(store: &dyn Store, key: &Key<'_>, value: &T) -> Result<()> {
    store.set(&key.to_string(), &serde_json::to_vec(value)?)
}

pub(crate) fn remove(store: &dyn Store, key: &Key<'_>) -> Result<bool> {
    store.remove(&key.to_string())
}
