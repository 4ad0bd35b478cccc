//! Permission records: read, write, delete and single-rule edits

use tracing::{debug, info, warn};

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::events::{PERMISSIONS_DELETED, PERMISSIONS_SET};
use crate::keys::Key;
use crate::model::{Permission, PermissionType, Permissions, Share};
use crate::store;
use crate::subject::SubjectType;

pub(crate) fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Validation("no resource path given".into()));
    }
    Ok(())
}

impl Rbac {
    /// Raw stored record, no cleanup.
    pub(crate) fn load_record(&self, path: &str) -> Result<Option<Permissions>> {
        store::load(self.store.as_ref(), &Key::Resource(path))
    }

    /// Raw record through the cache.
    pub(crate) fn cached_record(&self, path: &str) -> Result<Option<Permissions>> {
        if let Some(p) = self.cache.get(path) {
            return Ok(Some(p));
        }
        let rec = self.load_record(path)?;
        if let Some(p) = &rec {
            self.cache.insert(path, p.clone());
        }
        Ok(rec)
    }

    /// Record for a path, or `None` when there is nothing usable there.
    /// Missing, deleted and undecodable records all read as absent.
    pub(crate) fn lookup(&self, path: &str) -> Result<Option<Permissions>> {
        match self.get_resource_permissions(path) {
            Ok(p) => Ok(Some(p)),
            Err(Error::NotFound(_)) | Err(Error::ResourceMissing(_)) => Ok(None),
            Err(Error::Serialization(e)) => {
                warn!(path, error = %e, "skipping corrupt permissions record");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Get the permissions of a path.
    ///
    /// Dangling subjects are stripped (and the record re-persisted). If the
    /// record is for a file that no longer exists, the record is deleted and
    /// [`Error::ResourceMissing`] is returned.
    pub fn get_resource_permissions(&self, path: &str) -> Result<Permissions> {
        check_path(path)?;
        let raw = self
            .cached_record(path)?
            .ok_or_else(|| Error::NotFound(format!("no permissions for {path}")))?;
        self.cleanup(raw)
    }

    /// Replace the permissions of a path.
    ///
    /// Unknown subject ids are dropped. Reverse indices, the path's share
    /// and owner quotas (for file resources) follow the new record.
    pub fn set_resource_permissions(&self, path: &str, resource_type: &str, permissions: Permissions) -> Result<()> {
        check_path(path)?;
        self.locks.with(path, || self.write_record(path, resource_type, permissions)).map(drop)
    }

    /// [`set_resource_permissions`](Self::set_resource_permissions) on behalf
    /// of `caller`, who must own the path unless it is unowned.
    pub fn set_resource_permissions_as(
        &self,
        caller: &str,
        path: &str,
        resource_type: &str,
        permissions: Permissions,
    ) -> Result<()> {
        let id = self.require(SubjectType::Account, caller)?;
        if !self.is_service_account(SubjectType::Account, &id)
            && !self.validate_access(caller, SubjectType::Account, "owner", path)?.has_access
        {
            return Err(Error::PermissionDenied(format!("{id} does not own {path}")));
        }
        self.set_resource_permissions(path, resource_type, permissions)
    }

    /// Persist a record. Callers hold the path lock.
    pub(crate) fn write_record(&self, path: &str, resource_type: &str, mut perms: Permissions) -> Result<Permissions> {
        self.cache.evict(path);
        perms.path = path.to_string();
        perms.resource_type = resource_type.to_string();
        self.retain_known(&mut perms)?;
        perms.normalize();

        let previous = match self.load_record(path) {
            Ok(p) => p,
            Err(Error::Serialization(e)) => {
                warn!(path, error = %e, "overwriting corrupt permissions record");
                None
            }
            Err(e) => return Err(e),
        };

        let after = perms.subjects();
        if let Some(prev) = &previous {
            for (kind, id) in prev.subjects().difference(&after) {
                self.index_remove(&Key::SubjectPaths(*kind, id.as_str()), path)?;
            }
            if prev.resource_type != perms.resource_type {
                self.index_remove(&Key::ResourceType(&prev.resource_type), path)?;
            }
        }
        for (kind, id) in &after {
            self.index_add(&Key::SubjectPaths(*kind, id.as_str()), path)?;
        }
        self.index_add(&Key::ResourceType(&perms.resource_type), path)?;

        self.refresh_share(&perms)?;
        store::save(self.store.as_ref(), &Key::Resource(path), &perms)?;
        self.cache.evict(path);

        if perms.resource_type == self.config.file_resource_type {
            let old_owners = previous.as_ref().and_then(|p| p.owners.as_ref());
            self.charge_owner_delta(path, old_owners, perms.owners.as_ref())?;
        }

        debug!(path, resource_type, subjects = after.len(), "permissions stored");
        self.publish(PERMISSIONS_SET, &perms);
        Ok(perms)
    }

    /// Rebuild the path's share from everyone with allowed or owner access.
    fn refresh_share(&self, perms: &Permissions) -> Result<()> {
        let mut share = Share::new(self.config.domain.clone(), perms.path.clone());
        for (kind, id) in perms.grantees() {
            if let Some(m) = share.members_mut(kind) {
                m.insert(id);
            }
        }
        if share.is_empty() {
            self.unshare_resource(&self.config.domain, &perms.path)
        } else {
            self.write_share(&share)
        }
    }

    /// Delete the permissions of a path. Deleting an absent record succeeds.
    pub fn delete_resource_permissions(&self, path: &str) -> Result<()> {
        check_path(path)?;
        self.locks.with(path, || match self.load_record(path) {
            Ok(Some(perms)) => self.remove_record(&perms),
            Ok(None) => Ok(()),
            Err(Error::Serialization(e)) => {
                warn!(path, error = %e, "removing corrupt permissions record");
                self.cache.evict(path);
                store::remove(self.store.as_ref(), &Key::Resource(path)).map(drop)
            }
            Err(e) => Err(e),
        })
    }

    /// Tear down a record with its indices, share and owner charges.
    pub(crate) fn remove_record(&self, perms: &Permissions) -> Result<()> {
        let path = perms.path.as_str();
        self.cache.evict(path);
        for (kind, id) in perms.subjects() {
            self.index_remove(&Key::SubjectPaths(kind, id.as_str()), path)?;
        }
        self.index_remove(&Key::ResourceType(&perms.resource_type), path)?;
        self.unshare_resource(&self.config.domain, path)?;
        store::remove(self.store.as_ref(), &Key::Resource(path))?;
        self.cache.evict(path);

        if perms.resource_type == self.config.file_resource_type {
            if let Some(owners) = &perms.owners {
                self.release_owner_space(path, owners)?;
            }
        }

        info!(path, "permissions deleted");
        self.publish(PERMISSIONS_DELETED, perms);
        Ok(())
    }

    /// Insert or replace one named allow or deny rule.
    pub fn set_resource_permission(
        &self,
        path: &str,
        resource_type: &str,
        ty: PermissionType,
        permission: Permission,
    ) -> Result<()> {
        check_path(path)?;
        if permission.name.is_empty() {
            return Err(Error::Validation("permission has no name".into()));
        }
        self.locks.with(path, || {
            let mut perms = match self.get_resource_permissions(path) {
                Ok(p) => p,
                Err(e) if e.is_not_found() => Permissions::new(path, resource_type),
                Err(e) => return Err(e),
            };
            let rtype = if resource_type.is_empty() { perms.resource_type.clone() } else { resource_type.to_string() };
            let rules = perms.rules_mut(ty).get_or_insert_with(Vec::new);
            match rules.iter_mut().find(|p| p.name == permission.name) {
                Some(slot) => *slot = permission,
                None => rules.push(permission),
            }
            self.write_record(path, &rtype, perms).map(drop)
        })
    }

    pub fn get_resource_permission(&self, path: &str, name: &str, ty: PermissionType) -> Result<Permission> {
        let perms = self.get_resource_permissions(path)?;
        perms
            .find(ty, name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no {ty:?} permission {name} on {path}")))
    }

    pub fn delete_resource_permission(&self, path: &str, name: &str, ty: PermissionType) -> Result<()> {
        check_path(path)?;
        self.locks.with(path, || {
            let mut perms = self.get_resource_permissions(path)?;
            let rules = perms.rules_mut(ty);
            let before = rules.as_ref().map_or(0, Vec::len);
            if let Some(list) = rules.as_mut() {
                list.retain(|p| p.name != name);
            }
            if rules.as_ref().map_or(0, Vec::len) == before {
                return Err(Error::NotFound(format!("no {ty:?} permission {name} on {path}")));
            }
            if rules.as_ref().map_or(false, Vec::is_empty) {
                *rules = None;
            }
            let rtype = perms.resource_type.clone();
            self.write_record(path, &rtype, perms).map(drop)
        })
    }

    /// Make a subject an owner of `path`, creating the record if needed.
    pub fn add_resource_owner(&self, path: &str, resource_type: &str, subject: &str, kind: SubjectType) -> Result<()> {
        check_path(path)?;
        if kind == SubjectType::Role {
            return Err(Error::Validation("roles cannot own resources".into()));
        }
        let id = self.require(kind, subject)?;
        self.locks.with(path, || {
            let mut perms = match self.get_resource_permissions(path) {
                Ok(p) => p,
                Err(e) if e.is_not_found() => Permissions::new(path, resource_type),
                Err(e) => return Err(e),
            };
            if perms.owners.as_ref().map_or(false, |o| o.contains(kind, &id)) {
                return Ok(());
            }
            let rtype = if resource_type.is_empty() { perms.resource_type.clone() } else { resource_type.to_string() };
            perms.owners.get_or_insert_with(|| Permission::new("owner")).insert(kind, id);
            self.write_record(path, &rtype, perms).map(drop)
        })
    }

    pub fn remove_resource_owner(&self, path: &str, subject: &str, kind: SubjectType) -> Result<()> {
        check_path(path)?;
        let canonical = self.resolve(kind, subject)?;
        self.locks.with(path, || {
            let mut perms = self.get_resource_permissions(path)?;
            let Some(owners) = perms.owners.as_mut() else { return Ok(()) };
            let mut removed = owners.remove_matching(kind, subject, &self.config.domain);
            if let (Some(c), Some(m)) = (&canonical, owners.members_mut(kind)) {
                removed |= m.remove(c);
            }
            if !removed {
                return Ok(());
            }
            let rtype = perms.resource_type.clone();
            self.write_record(path, &rtype, perms).map(drop)
        })
    }

    /// Strip a subject from every allow and deny rule it appears in.
    /// Ownership is left alone.
    pub fn delete_all_access(&self, subject: &str, kind: SubjectType) -> Result<()> {
        let id = self.resolve_or_qualify(kind, subject)?;
        for path in self.subject_paths(kind, &id)? {
            self.locks.with(&path, || -> Result<()> {
                let mut perms = match self.lookup(&path)? {
                    Some(p) => p,
                    None => return Ok(()),
                };
                let mut changed = false;
                for rule in perms.allowed.iter_mut().flatten().chain(perms.denied.iter_mut().flatten()) {
                    changed |= rule.remove_matching(kind, id.as_str(), &self.config.domain);
                }
                if changed {
                    let rtype = perms.resource_type.clone();
                    self.write_record(&path, &rtype, perms)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}
