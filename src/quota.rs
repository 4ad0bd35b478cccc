//! Allocated and used space per owning subject
//!
//! Counters are 8-byte little-endian values. A counter of any other length
//! is deleted and treated as absent, which forces a rescan for used space.

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

use crate::cancel::Cancel;
use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::keys::Key;
use crate::model::Permission;
use crate::subject::{SubjectId, SubjectType};

pub(crate) fn encode(v: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, v);
    buf
}

pub(crate) fn decode(bytes: &[u8]) -> Option<u64> {
    (bytes.len() == 8).then(|| LittleEndian::read_u64(bytes))
}

impl Rbac {
    fn read_counter(&self, key: &Key<'_>) -> Result<Option<u64>> {
        let k = key.to_string();
        let Some(bytes) = self.store.get(&k)? else { return Ok(None) };
        match decode(&bytes) {
            Some(v) => Ok(Some(v)),
            None => {
                warn!(key = %k, len = bytes.len(), "removing corrupt space counter");
                self.store.remove(&k)?;
                Ok(None)
            }
        }
    }

    fn write_counter(&self, key: &Key<'_>, v: u64) -> Result<()> {
        self.store.set(&key.to_string(), &encode(v))
    }

    pub fn get_subject_allocated_space(&self, subject: &str, kind: SubjectType) -> Result<u64> {
        let id = self.require(kind, subject)?;
        Ok(self.read_counter(&Key::Allocated(kind, id.as_str()))?.unwrap_or(0))
    }

    /// Bytes used by everything the subject owns, computed on first use.
    pub fn get_subject_used_space(&self, subject: &str, kind: SubjectType) -> Result<u64> {
        let id = self.require(kind, subject)?;
        self.used_space(kind, &id, &self.scan_token())
    }

    /// Like [`get_subject_used_space`](Self::get_subject_used_space) with a
    /// caller-controlled cancellation token for the initial scan.
    pub fn get_subject_used_space_with(&self, subject: &str, kind: SubjectType, cancel: &Cancel) -> Result<u64> {
        let id = self.require(kind, subject)?;
        self.used_space(kind, &id, cancel)
    }

    /// `allocated - used`; an overdrawn subject is an error.
    pub fn get_subject_available_space(&self, subject: &str, kind: SubjectType) -> Result<u64> {
        let id = self.require(kind, subject)?;
        let allocated = self.read_counter(&Key::Allocated(kind, id.as_str()))?.unwrap_or(0);
        let used = self.used_space(kind, &id, &self.scan_token())?;
        allocated
            .checked_sub(used)
            .ok_or_else(|| Error::NoSpace(format!("{id} uses {used} of {allocated} bytes")))
    }

    /// Set the allocation of a subject. Only the service account and
    /// holders of the admin role may do this.
    pub fn set_subject_allocated_space(&self, caller: &str, subject: &str, kind: SubjectType, bytes: u64) -> Result<()> {
        if !self.may_allocate(caller)? {
            return Err(Error::PermissionDenied(format!("{caller} cannot set allocated space")));
        }
        let id = self.require(kind, subject)?;
        self.write_counter(&Key::Allocated(kind, id.as_str()), bytes)?;
        info!(subject = %id, %kind, bytes, "allocated space set");
        Ok(())
    }

    fn may_allocate(&self, caller: &str) -> Result<bool> {
        let Some(id) = self.resolve(SubjectType::Account, caller)? else { return Ok(false) };
        if self.is_service_account(SubjectType::Account, &id) {
            return Ok(true);
        }
        let admin = self.config.admin_role_id();
        if let Some(account) = self.directory.account(id.as_str())? {
            if account.roles.iter().any(|r| self.qualify(r.as_str()) == admin) {
                return Ok(true);
            }
        }
        Ok(self.directory.role(admin.as_str())?.map_or(false, |r| self.lists(&r.accounts, &id)))
    }

    /// Whether `required` more bytes fit. The service account always fits.
    pub fn validate_subject_space(&self, subject: &str, kind: SubjectType, required: u64) -> Result<bool> {
        let id = self.require(kind, subject)?;
        if self.is_service_account(kind, &id) {
            return Ok(true);
        }
        Ok(self.get_subject_available_space(subject, kind)? >= required)
    }

    fn used_space(&self, kind: SubjectType, id: &SubjectId, cancel: &Cancel) -> Result<u64> {
        let key = Key::Used(kind, id.as_str());
        self.locks.with(&key.to_string(), || match self.read_counter(&key)? {
            Some(v) => Ok(v),
            None => self.init_used_space(kind, id, cancel),
        })
    }

    /// Sum the size of every file the subject owns and persist it.
    /// Owned directories count every file beneath them once.
    pub(crate) fn init_used_space(&self, kind: SubjectType, id: &SubjectId, cancel: &Cancel) -> Result<u64> {
        let mut owned = BTreeSet::new();
        for path in self.subject_paths(kind, id)? {
            cancel.check()?;
            let rec = match self.cached_record(&path) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(Error::Serialization(e)) => {
                    warn!(path = %path, error = %e, "skipping corrupt record in space scan");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if rec.resource_type != self.config.file_resource_type
                || !rec.owners.as_ref().map_or(false, |o| o.contains(kind, id))
            {
                continue;
            }
            match self.files.stat(&path)? {
                Some(st) if st.is_dir => {
                    for f in self.files.list_files(&path)? {
                        cancel.check()?;
                        owned.insert(f);
                    }
                }
                Some(_) => {
                    owned.insert(path);
                }
                None => {}
            }
        }

        let mut total = 0u64;
        for f in &owned {
            cancel.check()?;
            if let Some(st) = self.files.stat(f)? {
                if !st.is_dir {
                    total = total.saturating_add(st.size);
                }
            }
        }
        self.write_counter(&Key::Used(kind, id.as_str()), total)?;
        debug!(subject = %id, %kind, files = owned.len(), total, "used space computed");
        Ok(total)
    }

    /// Move a file's size between owners that were added or removed.
    pub(crate) fn charge_owner_delta(&self, path: &str, old: Option<&Permission>, new: Option<&Permission>) -> Result<()> {
        let set = |p: Option<&Permission>| -> BTreeSet<(SubjectType, SubjectId)> {
            p.map(|p| p.subjects().map(|(k, id)| (k, id.clone())).collect()).unwrap_or_default()
        };
        let (old, new) = (set(old), set(new));
        if old == new {
            return Ok(());
        }
        let size = match self.files.stat(path)? {
            Some(st) if !st.is_dir => st.size,
            _ => return Ok(()),
        };
        for (kind, id) in new.difference(&old) {
            self.adjust_used(*kind, id, size, true)?;
        }
        for (kind, id) in old.difference(&new) {
            self.adjust_used(*kind, id, size, false)?;
        }
        Ok(())
    }

    /// Credit the owners of a record that is going away.
    pub(crate) fn release_owner_space(&self, path: &str, owners: &Permission) -> Result<()> {
        match self.files.stat(path)? {
            Some(st) if st.is_dir => Ok(()),
            Some(st) => {
                for (kind, id) in owners.subjects() {
                    self.adjust_used(kind, id, st.size, false)?;
                }
                Ok(())
            }
            None => {
                // size unknown: recompute on next read
                for (kind, id) in owners.subjects() {
                    self.store.remove(&Key::Used(kind, id.as_str()).to_string())?;
                }
                Ok(())
            }
        }
    }

    /// Apply a delta to an initialized counter. An absent counter is built
    /// by a full scan instead, which already reflects the change.
    fn adjust_used(&self, kind: SubjectType, id: &SubjectId, size: u64, charge: bool) -> Result<()> {
        let key = Key::Used(kind, id.as_str());
        self.locks.with(&key.to_string(), || match self.read_counter(&key)? {
            Some(v) => {
                let v = if charge { v.saturating_add(size) } else { v.saturating_sub(size) };
                self.write_counter(&key, v)
            }
            None => self.init_used_space(kind, id, &self.scan_token()).map(drop),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_layout() {
        assert_eq!(encode(1), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode(&encode(600)), Some(600));
    }

    #[test]
    fn test_wrong_length_is_corrupt() {
        assert_eq!(decode(&[1, 2, 3]), None);
        assert_eq!(decode(&[0; 9]), None);
    }
}
