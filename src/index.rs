//! Reverse indices: subject to paths, resource type to paths, subject to shares

use tracing::warn;

use crate::engine::Rbac;
use crate::error::Result;
use crate::keys::Key;
use crate::store;
use crate::subject::{SubjectId, SubjectType};

impl Rbac {
    /// Entries of a string-list index; a corrupt list reads as empty.
    pub(crate) fn index_list(&self, key: &Key<'_>) -> Result<Vec<String>> {
        match store::load::<Vec<String>>(self.store.as_ref(), key) {
            Ok(v) => Ok(v.unwrap_or_default()),
            Err(crate::Error::Serialization(e)) => {
                warn!(key = %key, error = %e, "discarding corrupt index entry");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Append `value` once.
    pub(crate) fn index_add(&self, key: &Key<'_>, value: &str) -> Result<()> {
        let k = key.to_string();
        self.locks.with(&k, || {
            let mut list = self.index_list(key)?;
            if list.iter().any(|v| v == value) {
                return Ok(());
            }
            list.push(value.to_string());
            store::save(self.store.as_ref(), key, &list)
        })
    }

    /// Drop `value`; the key goes away with its last entry.
    pub(crate) fn index_remove(&self, key: &Key<'_>, value: &str) -> Result<()> {
        let k = key.to_string();
        self.locks.with(&k, || {
            let mut list = self.index_list(key)?;
            let before = list.len();
            list.retain(|v| v != value);
            if list.len() == before {
                return Ok(());
            }
            if list.is_empty() {
                store::remove(self.store.as_ref(), key)?;
                Ok(())
            } else {
                store::save(self.store.as_ref(), key, &list)
            }
        })
    }

    /// Paths a subject appears in (allowed, denied or owner).
    pub fn subject_paths(&self, kind: SubjectType, id: &SubjectId) -> Result<Vec<String>> {
        self.index_list(&Key::SubjectPaths(kind, id.as_str()))
    }

    /// Paths registered under a resource type.
    pub fn resource_type_paths(&self, resource_type: &str) -> Result<Vec<String>> {
        self.index_list(&Key::ResourceType(resource_type))
    }
}
