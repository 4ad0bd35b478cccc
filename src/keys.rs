//! Storage key spaces.
//!
//! Every key the engine writes is rendered here, so the prefix for a given
//! subject kind can never drift between writers and readers.
//! - `RESOURCES/<path>`: [`Permissions`](crate::Permissions) record
//! - `PERMISSIONS/<KIND>S/<id>`: paths the subject appears in
//! - `RESOURCE_TYPES/<type>`: paths of that resource type
//! - `SHARES/<share-id>`: [`Share`](crate::Share) record
//! - `SHARED/<KIND>S/<id>`: share ids reaching the subject
//! - `ALLOCATED_SPACE/<KIND>/<id>`, `USED_SPACE/<KIND>/<id>`: 8-byte counters
//! - `ACTIONS/<action>`: resource infos for a method
//! - `ROLE_BINDINGS/<subject>`: bound role names

use std::fmt;

use uuid::Uuid;

use crate::subject::SubjectType;

pub const RESOURCES: &str = "RESOURCES/";
pub const ROLE_BINDINGS: &str = "ROLE_BINDINGS/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Resource(&'a str),
    SubjectPaths(SubjectType, &'a str),
    ResourceType(&'a str),
    Share(&'a str),
    SubjectShares(SubjectType, &'a str),
    Allocated(SubjectType, &'a str),
    Used(SubjectType, &'a str),
    Action(&'a str),
    RoleBinding(&'a str),
}

impl fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Resource(p) => write!(f, "{RESOURCES}{p}"),
            Key::SubjectPaths(k, id) => write!(f, "PERMISSIONS/{}S/{id}", k.key_name()),
            Key::ResourceType(t) => write!(f, "RESOURCE_TYPES/{t}"),
            Key::Share(id) => write!(f, "SHARES/{id}"),
            Key::SubjectShares(k, id) => write!(f, "SHARED/{}S/{id}", k.key_name()),
            Key::Allocated(k, id) => write!(f, "ALLOCATED_SPACE/{}/{id}", k.key_name()),
            Key::Used(k, id) => write!(f, "USED_SPACE/{}/{id}", k.key_name()),
            Key::Action(a) => write!(f, "ACTIONS/{a}"),
            Key::RoleBinding(s) => write!(f, "{ROLE_BINDINGS}{s}"),
        }
    }
}

/// Deterministic share id: the name-based (v5) UUID of `domain + path`.
pub fn share_id(domain: &str, path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{domain}{path}").as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_key_spaces() {
        assert_eq!(Key::SubjectPaths(SubjectType::Account, "a@x").to_string(), "PERMISSIONS/ACCOUNTS/a@x");
        assert_eq!(Key::SubjectPaths(SubjectType::NodeIdentity, "n1").to_string(), "PERMISSIONS/NODE_IDENTITYS/n1");
        assert_eq!(Key::SubjectShares(SubjectType::Group, "g@x").to_string(), "SHARED/GROUPS/g@x");
        assert_eq!(Key::Used(SubjectType::Account, "a@x").to_string(), "USED_SPACE/ACCOUNT/a@x");
    }

    #[test]
    fn test_resource_key_keeps_path() {
        assert_eq!(Key::Resource("/a/b").to_string(), "RESOURCES//a/b");
    }

    #[test]
    fn test_share_id_shape() {
        let id = share_id("localhost", "/files/a.txt");
        assert_eq!(id.len(), 36);
        let parts: Vec<_> = id.split('-').map(str::len).collect();
        assert_eq!(parts, vec![8, 4, 4, 4, 12]);
        assert_eq!(id, share_id("localhost", "/files/a.txt"));
        assert_ne!(id, share_id("other", "/files/a.txt"));
        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 5);
    }
}
