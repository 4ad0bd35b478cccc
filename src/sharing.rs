//! Share records and their per-subject reverse index

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::keys::{share_id, Key};
use crate::model::Share;
use crate::permissions::check_path;
use crate::store;
use crate::subject::{SubjectId, SubjectType};

impl Rbac {
    /// Publish a share, replacing any earlier share of the same path.
    /// Every subject must exist.
    pub fn share_resource(&self, share: &Share) -> Result<()> {
        check_path(&share.path)?;
        let mut canonical = Share::new(share.domain.clone(), share.path.clone());
        for (kind, raw) in share.subjects() {
            let id = self.require(kind, raw.as_str())?;
            if let Some(m) = canonical.members_mut(kind) {
                m.insert(id);
            }
        }
        self.write_share(&canonical)
    }

    pub(crate) fn write_share(&self, share: &Share) -> Result<()> {
        let id = share_id(&share.domain, &share.path);
        self.unshare_resource(&share.domain, &share.path)?;
        store::save(self.store.as_ref(), &Key::Share(&id), share)?;
        for (kind, sid) in share.subjects() {
            self.index_add(&Key::SubjectShares(kind, sid.as_str()), &id)?;
        }
        Ok(())
    }

    /// Remove the share of a path and every reverse entry pointing at it.
    pub fn unshare_resource(&self, domain: &str, path: &str) -> Result<()> {
        let id = share_id(domain, path);
        if let Some(prev) = self.load_share(&id)? {
            for (kind, sid) in prev.subjects() {
                self.index_remove(&Key::SubjectShares(kind, sid.as_str()), &id)?;
            }
        }
        store::remove(self.store.as_ref(), &Key::Share(&id))?;
        Ok(())
    }

    pub fn get_share(&self, domain: &str, path: &str) -> Result<Option<Share>> {
        self.load_share(&share_id(domain, path))
    }

    fn load_share(&self, id: &str) -> Result<Option<Share>> {
        match store::load(self.store.as_ref(), &Key::Share(id)) {
            Err(Error::Serialization(e)) => {
                warn!(share = id, error = %e, "ignoring corrupt share");
                Ok(None)
            }
            r => r,
        }
    }

    /// Shares reaching a subject: its own, plus (for accounts) those of its
    /// groups and organizations and (for groups) those of its organizations,
    /// de-duplicated by path.
    ///
    /// With `owner`, only shares tied to that owner are kept: shares naming
    /// the owner account when it owns the path, and shares naming the owner
    /// group/organization/application when the subject itself does not own
    /// the path.
    pub fn get_shared_resources(&self, subject: &str, kind: SubjectType, owner: Option<&str>) -> Result<Vec<Share>> {
        let id = self.require(kind, subject)?;
        let mut visited = HashSet::new();
        let shares = self.collect_shares(kind, &id, &mut visited)?;
        let Some(owner) = owner.filter(|o| !o.is_empty()) else { return Ok(shares) };

        let domain = &self.config.domain;
        let named = |s: &Share, k: SubjectType| s.members(k).map_or(false, |m| m.iter().any(|x| x.same_as(owner, domain)));
        let owner_id = self.qualify(owner);
        let mut kept = Vec::new();
        for share in shares {
            let keep = if named(&share, SubjectType::Account) {
                self.is_owner(SubjectType::Account, &owner_id, &share.path)?
            } else if [SubjectType::Group, SubjectType::Organization, SubjectType::Application]
                .into_iter()
                .any(|k| named(&share, k))
            {
                !self.is_owner(kind, &id, &share.path)?
            } else {
                false
            };
            if keep {
                kept.push(share);
            }
        }
        Ok(kept)
    }

    fn collect_shares(
        &self,
        kind: SubjectType,
        id: &SubjectId,
        visited: &mut HashSet<(SubjectType, SubjectId)>,
    ) -> Result<Vec<Share>> {
        if !visited.insert((kind, id.clone())) {
            return Ok(Vec::new());
        }
        let mut out: Vec<Share> = Vec::new();
        for sid in self.index_list(&Key::SubjectShares(kind, id.as_str()))? {
            if let Some(share) = self.load_share(&sid)? {
                if !share.is_empty() && !out.iter().any(|s| s.path == share.path) {
                    out.push(share);
                }
            }
        }

        let via: Vec<(SubjectType, SubjectId)> = match kind {
            SubjectType::Account => match self.directory.account(id.as_str())? {
                Some(a) => a.groups.iter().map(|g| (SubjectType::Group, self.qualify(g.as_str())))
                    .chain(a.organizations.iter().map(|o| (SubjectType::Organization, self.qualify(o.as_str()))))
                    .collect(),
                None => Vec::new(),
            },
            SubjectType::Group => match self.directory.group(id.as_str())? {
                Some(g) => g.organizations.iter().map(|o| (SubjectType::Organization, self.qualify(o.as_str()))).collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        for (k, pid) in via {
            for share in self.collect_shares(k, &pid, visited)? {
                if !out.iter().any(|s| s.path == share.path) {
                    out.push(share);
                }
            }
        }
        Ok(out)
    }

    /// Take one subject off a share and off the path's allow and deny rules.
    pub fn remove_subject_from_share(&self, subject: &str, kind: SubjectType, domain: &str, path: &str) -> Result<()> {
        check_path(path)?;
        let id = share_id(domain, path);
        if self.load_share(&id)?.is_none() {
            return Err(Error::NotFound(format!("no share for {path}")));
        }
        let canonical = self.resolve(kind, subject)?;
        let strip = |ids: &mut std::collections::BTreeSet<SubjectId>| {
            let before = ids.len();
            ids.retain(|x| !x.same_as(subject, &self.config.domain) && Some(x) != canonical.as_ref());
            ids.len() != before
        };

        self.locks.with(path, || -> Result<()> {
            if let Some(mut perms) = self.lookup(path)? {
                let mut changed = false;
                for rule in perms.allowed.iter_mut().flatten().chain(perms.denied.iter_mut().flatten()) {
                    if let Some(m) = rule.members_mut(kind) {
                        changed |= strip(m);
                    }
                }
                if changed {
                    let rtype = perms.resource_type.clone();
                    self.write_record(path, &rtype, perms)?;
                }
            }
            // an owner is still on the rebuilt share
            if let Some(mut share) = self.load_share(&id)? {
                let changed = share.members_mut(kind).map_or(false, |m| strip(m));
                if changed {
                    if share.is_empty() {
                        self.unshare_resource(domain, path)?;
                    } else {
                        self.write_share(&share)?;
                    }
                }
            }
            debug!(path, %kind, subject, "subject removed from share");
            Ok(())
        })
    }

    /// Remove a subject from every share that names it.
    pub fn delete_subject_share(&self, subject: &str, kind: SubjectType) -> Result<()> {
        let id = self.resolve_or_qualify(kind, subject)?;
        let key = Key::SubjectShares(kind, id.as_str());
        for sid in self.index_list(&key)? {
            let Some(share) = self.load_share(&sid)? else { continue };
            match self.remove_subject_from_share(id.as_str(), kind, &share.domain, &share.path) {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        store::remove(self.store.as_ref(), &key)?;
        Ok(())
    }
}
