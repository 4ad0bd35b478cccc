//! Lazy consistency repair on read

use std::collections::BTreeSet;

use tracing::warn;

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::files::is_hidden;
use crate::model::{Permission, Permissions};
use crate::subject::SubjectType;

impl Rbac {
    /// Validate a freshly read record against its collaborators.
    pub(crate) fn cleanup(&self, perms: Permissions) -> Result<Permissions> {
        let path = perms.path.clone();
        if perms.resource_type == self.config.file_resource_type
            && !is_hidden(&path)
            && self.files.stat(&path)?.is_none()
        {
            warn!(path = %path, "backing file is gone, dropping its permissions");
            self.locks.with(&path, || match self.load_record(&path) {
                Ok(Some(current)) => self.remove_record(&current),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            })?;
            return Err(Error::ResourceMissing(path));
        }

        let mut clean = perms.clone();
        if !self.retain_known(&mut clean)? {
            return Ok(perms);
        }
        // The copy above was read unlocked; repair what is stored now.
        self.locks.with(&path, || -> Result<Permissions> {
            match self.load_record(&path)? {
                Some(current) => {
                    let rtype = current.resource_type.clone();
                    self.write_record(&path, &rtype, current)
                }
                None => Err(Error::NotFound(format!("no permissions for {path}"))),
            }
        })
    }

    /// Replace every subject id with its canonical form, dropping ids the
    /// directory no longer knows. Returns whether anything changed.
    pub(crate) fn retain_known(&self, perms: &mut Permissions) -> Result<bool> {
        let mut changed = false;
        let path = perms.path.clone();
        let rules = perms.allowed.iter_mut().flatten().chain(perms.denied.iter_mut().flatten()).chain(perms.owners.iter_mut());
        for rule in rules {
            changed |= self.retain_known_rule(&path, rule)?;
        }
        Ok(changed)
    }

    fn retain_known_rule(&self, path: &str, rule: &mut Permission) -> Result<bool> {
        let mut changed = false;
        let name = rule.name.clone();
        for kind in SubjectType::GRANTABLE {
            let Some(members) = rule.members_mut(kind) else { continue };
            if members.is_empty() {
                continue;
            }
            let mut kept = BTreeSet::new();
            for id in members.iter() {
                match self.resolve(kind, id.as_str())? {
                    Some(canonical) => {
                        changed |= canonical != *id;
                        kept.insert(canonical);
                    }
                    None => {
                        warn!(path, %kind, subject = %id, rule = %name, "dropping unknown subject");
                        changed = true;
                    }
                }
            }
            *members = kept;
        }
        Ok(changed)
    }
}
