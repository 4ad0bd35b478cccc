//! Method-level authorization
//!
//! Action names look like `/package.Service/Method`. Patterns may be the
//! global wildcard `/*` or a per-service wildcard `/package.Service/*`.

use std::collections::HashSet;

use tracing::debug;

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::keys::Key;
use crate::model::{Access, ResourceInfos};
use crate::store;
use crate::subject::{Role, SubjectId, SubjectType};

/// Normalize an action name, rejecting anything that could smuggle a
/// different method past a pattern.
///
/// Rejected: empty input, control bytes, a missing leading `/`, and any
/// `/.` sequence (which covers both `/./` and `/../`). Runs of `/` collapse
/// to one. The result is `/*` or exactly two non-empty segments.
pub fn canonicalize_action(action: &str) -> Result<String> {
    if action.is_empty() {
        return Err(Error::InvalidAction("empty action".into()));
    }
    if action.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(Error::InvalidAction(format!("control character in {action:?}")));
    }
    if !action.starts_with('/') {
        return Err(Error::InvalidAction(format!("{action} does not start with '/'")));
    }
    if action.contains("/.") {
        return Err(Error::InvalidAction(format!("{action} contains a dot segment")));
    }

    let mut clean = String::with_capacity(action.len());
    let mut prev_slash = false;
    for c in action.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        clean.push(c);
    }

    if clean == "/*" {
        return Ok(clean);
    }
    let mut segments = clean[1..].split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(svc), Some(method), None) if !svc.is_empty() && !method.is_empty() => Ok(clean),
        _ => Err(Error::InvalidAction(format!("{action} is not /service/method"))),
    }
}

/// Does `pattern` cover `action`? Either side failing canonicalization is
/// a miss.
pub fn matches_action(pattern: &str, action: &str) -> bool {
    let (Ok(pattern), Ok(action)) = (canonicalize_action(pattern), canonicalize_action(action)) else {
        return false;
    };
    if pattern == action || pattern == "/*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('/') => action.starts_with(prefix),
        _ => false,
    }
}

fn any_matches(patterns: &[String], action: &str) -> bool {
    patterns.iter().any(|p| matches_action(p, action))
}

impl Rbac {
    /// Register which arguments of `action` carry resource paths.
    pub fn set_action_resource_infos(&self, action: &str, mut infos: Vec<ResourceInfos>) -> Result<()> {
        let action = canonicalize_action(action)?;
        for i in &mut infos {
            i.path.clear();
        }
        store::save(self.store.as_ref(), &Key::Action(&action), &infos)
    }

    /// Registered resource infos; empty when none were registered.
    pub fn get_action_resource_infos(&self, action: &str) -> Result<Vec<ResourceInfos>> {
        let action = canonicalize_action(action)?;
        Ok(store::load(self.store.as_ref(), &Key::Action(&action))?.unwrap_or_default())
    }

    /// Can `subject` call `action`, and pass the resource checks bound to it?
    ///
    /// When several resources carry a path, only the first one is checked.
    pub fn validate_action(
        &self,
        action: &str,
        subject: &str,
        kind: SubjectType,
        resources: &[ResourceInfos],
    ) -> Result<Access> {
        if action.is_empty() {
            return Err(Error::Validation("no action given".into()));
        }
        if resources.is_empty() && any_matches(&self.config.open_actions, action) {
            return Ok(Access::GRANTED);
        }
        let id = self.require(kind, subject)?;

        let granted = match kind {
            SubjectType::Application => {
                let app = self.directory.application(id.as_str())?;
                app.map_or(false, |a| any_matches(&a.actions, action))
            }
            SubjectType::Peer => {
                let peer = self.directory.peer(id.as_str())?;
                peer.map_or(false, |p| any_matches(&p.actions, action))
            }
            SubjectType::Role => {
                let role = self.directory.role(id.as_str())?;
                role.map_or(false, |r| self.role_allows(&r, action))
            }
            SubjectType::Account => {
                if self.is_service_account(kind, &id) {
                    return Ok(Access::GRANTED);
                }
                self.account_allows(&id, action)?
            }
            _ => false,
        };

        if !granted {
            debug!(action, subject = %id, %kind, "method not granted");
            return Ok(Access::DENIED);
        }
        if kind == SubjectType::Role {
            return Ok(Access::GRANTED);
        }

        if !resources.is_empty() {
            if self.get_action_resource_infos(action)?.is_empty() {
                return Err(Error::Validation(format!("no resource infos registered for {action}")));
            }
            if let Some(r) = resources.iter().find(|r| !r.path.is_empty()) {
                return self.validate_access(id.as_str(), kind, &r.permission, &r.path);
            }
        }
        Ok(Access::GRANTED)
    }

    fn role_allows(&self, role: &Role, action: &str) -> bool {
        role.id == self.config.admin_role_id() || any_matches(&role.actions, action)
    }

    /// Directly assigned local roles, then roles listing the account, then
    /// roles of the account's groups.
    fn account_allows(&self, id: &SubjectId, action: &str) -> Result<bool> {
        let account = self
            .directory
            .account(id.as_str())?
            .ok_or_else(|| Error::SubjectNotFound { kind: SubjectType::Account, id: id.to_string() })?;
        let admin = self.config.admin_role_id();
        let local = format!("@{}", self.config.domain);

        for rid in &account.roles {
            let rid = self.qualify(rid.as_str());
            if rid == admin {
                return Ok(true);
            }
            if rid.as_str().ends_with(&local) && self.role_id_allows(&rid, action)? {
                return Ok(true);
            }
        }

        let roles = self.directory.roles()?;
        if roles.iter().any(|r| self.lists(&r.accounts, id) && self.role_allows(r, action)) {
            return Ok(true);
        }

        let groups = if account.groups.is_empty() {
            self.directory.groups()?.into_iter().filter(|g| self.lists(&g.accounts, id)).collect()
        } else {
            let mut found = Vec::new();
            for gid in &account.groups {
                if let Some(g) = self.directory.group(self.qualify(gid.as_str()).as_str())? {
                    found.push(g);
                }
            }
            found
        };
        let mut seen = HashSet::new();
        for g in &groups {
            let domain = g.id.domain().unwrap_or(&self.config.domain);
            for rid in &g.roles {
                let rid = SubjectId::qualify(rid.as_str(), domain);
                if seen.insert(rid.clone()) && self.role_id_allows(&rid, action)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn role_id_allows(&self, id: &SubjectId, action: &str) -> Result<bool> {
        if *id == self.config.admin_role_id() {
            return Ok(true);
        }
        Ok(self.directory.role(id.as_str())?.map_or(false, |r| self.role_allows(&r, action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(canonicalize_action("/rbac.RbacService/CreateAccount").unwrap(), "/rbac.RbacService/CreateAccount");
        assert_eq!(canonicalize_action("/*").unwrap(), "/*");
        assert_eq!(canonicalize_action("/rbac.RbacService/*").unwrap(), "/rbac.RbacService/*");
        assert_eq!(canonicalize_action("/rbac.RbacService//CreateAccount").unwrap(), "/rbac.RbacService/CreateAccount");
        assert_eq!(canonicalize_action("/rbac.RbacService///CreateAccount").unwrap(), "/rbac.RbacService/CreateAccount");
    }

    #[test]
    fn test_rejected_forms() {
        for bad in [
            "",
            "/rbac.RbacService/./CreateAccount",
            "/rbac.RbacService/../dns.DnsService/CreateZone",
            "/rbac.RbacService/Create\x00Account",
            "/rbac.RbacService/Create\nAccount",
            "/rbac.RbacService/Create\tAccount",
            "/rbac.RbacService/Create\x7fAccount",
            "rbac.RbacService/CreateAccount",
            "/rbac/RbacService/CreateAccount/Extra",
            "/rbac.RbacService",
            "//",
        ] {
            assert!(canonicalize_action(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_wildcards() {
        assert!(matches_action("/*", "/rbac.RbacService/CreateAccount"));
        assert!(matches_action("/svc.Service/*", "/svc.Service/Method"));
        assert!(!matches_action("/svc.Service/*", "/other.Service/Method"));
        assert!(!matches_action("/svc.Service/*", "/svc.ServiceX/Method"));
        assert!(matches_action("/rbac.RbacService/CreateAccount", "/rbac.RbacService//CreateAccount"));
        assert!(!matches_action("/rbac.RbacService/CreateAccount", "/rbac.RbacService/DeleteAccount"));
    }

    #[test]
    fn test_invalid_side_never_matches() {
        assert!(!matches_action("/rbac.RbacService/CreateAccount", "/rbac.RbacService/./CreateAccount"));
        assert!(!matches_action("*", "/rbac.RbacService/CreateAccount"));
        assert!(!matches_action("/a/b/c", "/a/b/c"));
        assert!(!matches_action("", "/rbac.RbacService/CreateAccount"));
    }
}
