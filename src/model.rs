//! Permission records and related values

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::subject::{SubjectId, SubjectType};

type Members = BTreeSet<SubjectId>;

/// One named rule, e.g. `read`, with the subjects it applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub accounts: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub applications: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub organizations: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub peers: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub node_identities: Members,
}

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Permission { name: name.into(), ..Default::default() }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, kind: SubjectType, id: impl Into<SubjectId>) -> Self {
        self.insert(kind, id.into());
        self
    }

    /// Member set for a kind; roles cannot be members of a rule.
    pub fn members(&self, kind: SubjectType) -> Option<&Members> {
        match kind {
            SubjectType::Account => Some(&self.accounts),
            SubjectType::Application => Some(&self.applications),
            SubjectType::Group => Some(&self.groups),
            SubjectType::Organization => Some(&self.organizations),
            SubjectType::Peer => Some(&self.peers),
            SubjectType::NodeIdentity => Some(&self.node_identities),
            SubjectType::Role => None,
        }
    }

    pub fn members_mut(&mut self, kind: SubjectType) -> Option<&mut Members> {
        match kind {
            SubjectType::Account => Some(&mut self.accounts),
            SubjectType::Application => Some(&mut self.applications),
            SubjectType::Group => Some(&mut self.groups),
            SubjectType::Organization => Some(&mut self.organizations),
            SubjectType::Peer => Some(&mut self.peers),
            SubjectType::NodeIdentity => Some(&mut self.node_identities),
            SubjectType::Role => None,
        }
    }

    pub fn insert(&mut self, kind: SubjectType, id: SubjectId) -> bool {
        self.members_mut(kind).map_or(false, |m| m.insert(id))
    }

    pub fn contains(&self, kind: SubjectType, id: &SubjectId) -> bool {
        self.members(kind).map_or(false, |m| m.contains(id))
    }

    /// Remove every stored form of `raw` (bare or qualified).
    pub fn remove_matching(&mut self, kind: SubjectType, raw: &str, domain: &str) -> bool {
        let Some(m) = self.members_mut(kind) else { return false };
        let before = m.len();
        m.retain(|id| !id.same_as(raw, domain));
        m.len() != before
    }

    pub fn is_empty(&self) -> bool {
        SubjectType::GRANTABLE
            .iter()
            .all(|k| self.members(*k).map_or(true, BTreeSet::is_empty))
    }

    pub fn subjects(&self) -> impl Iterator<Item = (SubjectType, &SubjectId)> {
        SubjectType::GRANTABLE.into_iter().flat_map(move |k| {
            self.members(k).into_iter().flatten().map(move |id| (k, id))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Allowed,
    Denied,
}

/// The durable record attached to one resource path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub path: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied: Option<Vec<Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<Permission>,
}

impl Permissions {
    pub fn new(path: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Permissions { path: path.into(), resource_type: resource_type.into(), ..Default::default() }
    }

    pub fn allow(mut self, p: Permission) -> Self {
        self.allowed.get_or_insert_with(Vec::new).push(p);
        self
    }

    pub fn deny(mut self, p: Permission) -> Self {
        self.denied.get_or_insert_with(Vec::new).push(p);
        self
    }

    pub fn owned_by(mut self, kind: SubjectType, id: impl Into<SubjectId>) -> Self {
        self.owners.get_or_insert_with(|| Permission::new("owner")).insert(kind, id.into());
        self
    }

    pub fn rules(&self, ty: PermissionType) -> Option<&Vec<Permission>> {
        match ty {
            PermissionType::Allowed => self.allowed.as_ref(),
            PermissionType::Denied => self.denied.as_ref(),
        }
    }

    pub fn rules_mut(&mut self, ty: PermissionType) -> &mut Option<Vec<Permission>> {
        match ty {
            PermissionType::Allowed => &mut self.allowed,
            PermissionType::Denied => &mut self.denied,
        }
    }

    pub fn find(&self, ty: PermissionType, name: &str) -> Option<&Permission> {
        self.rules(ty)?.iter().find(|p| p.name == name)
    }

    /// True if someone owns this path.
    pub fn has_owner(&self) -> bool {
        self.owners.as_ref().map_or(false, |o| !o.is_empty())
    }

    /// Every subject referenced anywhere in the record.
    pub fn subjects(&self) -> BTreeSet<(SubjectType, SubjectId)> {
        let rules = self.allowed.iter().flatten().chain(self.denied.iter().flatten()).chain(self.owners.iter());
        rules.flat_map(|p| p.subjects().map(|(k, id)| (k, id.clone()))).collect()
    }

    /// Subjects with any access: allowed rules plus owners.
    pub fn grantees(&self) -> BTreeSet<(SubjectType, SubjectId)> {
        let rules = self.allowed.iter().flatten().chain(self.owners.iter());
        rules.flat_map(|p| p.subjects().map(|(k, id)| (k, id.clone()))).collect()
    }

    /// Collapse empty rule lists and an empty owner set to `None`.
    pub fn normalize(&mut self) {
        for list in [&mut self.allowed, &mut self.denied] {
            if list.as_ref().map_or(false, |l| l.iter().all(Permission::is_empty)) {
                *list = None;
            }
        }
        if self.owners.as_ref().map_or(false, Permission::is_empty) {
            self.owners = None;
        }
    }
}

/// Resource-centric record of everyone with some access to a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub accounts: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub applications: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub organizations: Members,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub peers: Members,
}

impl Share {
    pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Self {
        Share { domain: domain.into(), path: path.into(), ..Default::default() }
    }

    pub fn with(mut self, kind: SubjectType, id: impl Into<SubjectId>) -> Self {
        if let Some(m) = self.members_mut(kind) {
            m.insert(id.into());
        }
        self
    }

    pub fn members(&self, kind: SubjectType) -> Option<&Members> {
        match kind {
            SubjectType::Account => Some(&self.accounts),
            SubjectType::Application => Some(&self.applications),
            SubjectType::Group => Some(&self.groups),
            SubjectType::Organization => Some(&self.organizations),
            SubjectType::Peer => Some(&self.peers),
            _ => None,
        }
    }

    pub fn members_mut(&mut self, kind: SubjectType) -> Option<&mut Members> {
        match kind {
            SubjectType::Account => Some(&mut self.accounts),
            SubjectType::Application => Some(&mut self.applications),
            SubjectType::Group => Some(&mut self.groups),
            SubjectType::Organization => Some(&mut self.organizations),
            SubjectType::Peer => Some(&mut self.peers),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.applications.is_empty()
            && self.groups.is_empty()
            && self.organizations.is_empty()
            && self.peers.is_empty()
    }

    pub fn subjects(&self) -> Vec<(SubjectType, SubjectId)> {
        [SubjectType::Account, SubjectType::Application, SubjectType::Group, SubjectType::Organization, SubjectType::Peer]
            .into_iter()
            .flat_map(|k| self.members(k).into_iter().flatten().map(move |id| (k, id.clone())))
            .collect()
    }
}

/// Which argument of a method carries a resource path, and the permission it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfos {
    pub index: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    pub permission: String,
    /// Filled in by the caller with the argument's value at validation time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl ResourceInfos {
    pub fn new(index: u32, permission: impl Into<String>) -> Self {
        ResourceInfos { index, permission: permission.into(), ..Default::default() }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// Flat subject to role-name binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub subject: String,
    pub roles: Vec<String>,
}

/// Outcome of an access or action check.
///
/// `access_denied` is only set when an explicit deny matched (or a method
/// was not granted); a plain miss leaves both flags false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub has_access: bool,
    pub access_denied: bool,
}

impl Access {
    pub const GRANTED: Access = Access { has_access: true, access_denied: false };
    pub const DENIED: Access = Access { has_access: false, access_denied: true };
    pub const NONE: Access = Access { has_access: false, access_denied: false };
}
