//! Access resolution over the path hierarchy
//!
//! Order of evaluation for `validate_access(subject, permission, path)`:
//! 1. paths inside `.hidden/` are open to everyone
//! 2. ownership: the nearest record on the ancestor chain that has owners
//!    decides; an owner (directly or through a group/organization) is granted
//! 3. the `owner` permission never goes further: granted only when the
//!    chain has no owner at all
//! 4. deny: the nearest rule with this name on the chain; a match denies
//! 5. allow: the nearest rule with this name on the chain; with no allow
//!    rules anywhere the resource is open, public paths fall back to read

use std::collections::HashSet;

use tracing::debug;

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::files::is_hidden;
use crate::model::{Access, Permission, PermissionType, Permissions};
use crate::permissions::check_path;
use crate::subject::{SubjectId, SubjectType};

pub const OWNER: &str = "owner";
pub const READ: &str = "read";

/// `path`, then each parent obtained by cutting at the last `/`, stopping
/// before the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |&p| match p.rfind('/') {
        Some(i) if i > 0 => Some(&p[..i]),
        _ => None,
    })
}

/// A subject together with every group and organization it belongs to.
pub(crate) struct Membership {
    members: HashSet<(SubjectType, SubjectId)>,
}

impl Membership {
    pub(crate) fn matches(&self, rule: &Permission) -> bool {
        self.members.iter().any(|(k, id)| rule.contains(*k, id))
    }
}

impl Rbac {
    /// Can `subject` exercise `permission` on `path`?
    pub fn validate_access(&self, subject: &str, kind: SubjectType, permission: &str, path: &str) -> Result<Access> {
        check_path(path)?;
        if permission.is_empty() {
            return Err(Error::Validation("no permission name given".into()));
        }
        let id = self.require(kind, subject)?;
        if is_hidden(path) {
            return Ok(Access::GRANTED);
        }

        let chain = ancestors(path).map(|p| self.lookup(p)).collect::<Result<Vec<_>>>()?;
        let records = || chain.iter().flatten();
        let direct = self.membership(kind, &id, false)?;

        let owned = records().find(|r| r.has_owner());
        if let Some(owners) = owned.and_then(|r| r.owners.as_ref()) {
            if direct.matches(owners) {
                debug!(path, subject = %id, permission, "granted to owner");
                return Ok(Access::GRANTED);
            }
        }
        if permission == OWNER {
            return Ok(if owned.is_none() { Access::GRANTED } else { Access::NONE });
        }

        if let Some(rule) = records().find_map(|r| r.find(PermissionType::Denied, permission)) {
            if direct.matches(rule) {
                debug!(path, subject = %id, permission, "denied");
                return Ok(Access::DENIED);
            }
        }

        if self.is_service_account(kind, &id) {
            return Ok(Access::GRANTED);
        }
        self.resolve_allowed(kind, &id, permission, path, records())
    }

    fn resolve_allowed<'a>(
        &self,
        kind: SubjectType,
        id: &SubjectId,
        permission: &str,
        path: &str,
        records: impl Iterator<Item = &'a Permissions>,
    ) -> Result<Access> {
        let mut has_rules = false;
        for rec in records {
            let Some(allowed) = &rec.allowed else { continue };
            has_rules = true;
            if let Some(rule) = allowed.iter().find(|p| p.name == permission) {
                if self.membership(kind, id, true)?.matches(rule) {
                    return Ok(Access::GRANTED);
                }
                return Ok(self.public_fallback(path, permission));
            }
        }
        if !has_rules {
            return Ok(Access::GRANTED);
        }
        Ok(self.public_fallback(path, permission))
    }

    fn public_fallback(&self, path: &str, permission: &str) -> Access {
        if permission == READ && self.files.is_public(path) {
            Access::GRANTED
        } else {
            Access::NONE
        }
    }

    /// Whether the subject owns `path` through the nearest owned ancestor.
    pub(crate) fn is_owner(&self, kind: SubjectType, id: &SubjectId, path: &str) -> Result<bool> {
        for p in ancestors(path) {
            let Some(rec) = self.lookup(p)? else { continue };
            if let Some(owners) = rec.owners.as_ref().filter(|o| !o.is_empty()) {
                return Ok(self.membership(kind, id, false)?.matches(owners));
            }
        }
        Ok(false)
    }

    /// Walk group and organization membership breadth-first.
    ///
    /// With `scan`, groups and organizations whose member lists name the
    /// account are included even when the account record does not list them.
    pub(crate) fn membership(&self, kind: SubjectType, id: &SubjectId, scan: bool) -> Result<Membership> {
        let mut members = HashSet::new();
        members.insert((kind, id.clone()));
        let mut frontier = vec![(kind, id.clone())];

        if scan && kind == SubjectType::Account {
            for g in self.directory.groups()? {
                if self.lists(&g.accounts, id) && members.insert((SubjectType::Group, g.id.clone())) {
                    frontier.push((SubjectType::Group, g.id));
                }
            }
            for o in self.directory.organizations()? {
                if self.lists(&o.accounts, id) && members.insert((SubjectType::Organization, o.id.clone())) {
                    frontier.push((SubjectType::Organization, o.id));
                }
            }
        }

        let max = self.config.max_membership_depth;
        let mut depth = 0;
        while !frontier.is_empty() {
            if depth > max {
                return Err(Error::MembershipTooDeep(max));
            }
            let mut next = Vec::new();
            for (k, sid) in frontier {
                for parent in self.parents(k, &sid)? {
                    if members.insert(parent.clone()) {
                        next.push(parent);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(Membership { members })
    }

    /// Membership lists may hold bare ids.
    pub(crate) fn lists(&self, ids: &[SubjectId], id: &SubjectId) -> bool {
        ids.iter().any(|m| self.qualify(m.as_str()) == *id)
    }

    /// Groups and organizations a subject record names directly.
    fn parents(&self, kind: SubjectType, id: &SubjectId) -> Result<Vec<(SubjectType, SubjectId)>> {
        let q = |ids: Vec<SubjectId>, k: SubjectType| ids.into_iter().map(move |g| (k, self.qualify(g.as_str())));
        Ok(match kind {
            SubjectType::Account => match self.directory.account(id.as_str())? {
                Some(a) => q(a.groups, SubjectType::Group).chain(q(a.organizations, SubjectType::Organization)).collect(),
                None => Vec::new(),
            },
            SubjectType::Group => match self.directory.group(id.as_str())? {
                Some(g) => q(g.groups, SubjectType::Group).chain(q(g.organizations, SubjectType::Organization)).collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        })
    }
}
