//! Lazy repair of records on read

mod common;

use std::collections::BTreeSet;

use common::{allow, id, Fixture};
use pathguard::*;

/// Deleted subjects disappear from records, and a second read changes nothing
#[test]
fn dangling_subjects_are_dropped_once() {
    let f = Fixture::new();
    f.account("alice");
    f.account("bob");
    let perms = Permissions::new("/docs", "folder")
        .allow(allow("read", &["alice", "bob"]))
        .deny(allow("write", &["bob"]))
        .owned_by(SubjectType::Account, "bob");
    f.rbac.set_resource_permissions("/docs", "folder", perms).unwrap();

    f.directory.remove(SubjectType::Account, "bob");
    let before = f.count_topic(PERMISSIONS_SET);

    let first = f.rbac.get_resource_permissions("/docs").unwrap();
    assert_eq!(first.find(PermissionType::Allowed, "read").unwrap().accounts, BTreeSet::from([id("alice")]));
    assert!(first.denied.is_none());
    assert!(first.owners.is_none());
    assert_eq!(f.count_topic(PERMISSIONS_SET), before + 1);

    let second = f.rbac.get_resource_permissions("/docs").unwrap();
    assert_eq!(first, second);
    assert_eq!(f.count_topic(PERMISSIONS_SET), before + 1);
    assert!(f.rbac.subject_paths(SubjectType::Account, &id("bob")).unwrap().is_empty());
}

/// A file record whose file is gone is deleted on read
#[test]
fn missing_file_drops_record() {
    let f = Fixture::new();
    f.account("alice");
    f.write_file("/files/gone.txt", 10);
    f.rbac.add_resource_owner("/files/gone.txt", "file", "alice", SubjectType::Account).unwrap();
    f.remove_file("/files/gone.txt");

    let err = f.rbac.get_resource_permissions("/files/gone.txt").unwrap_err();
    assert!(matches!(err, Error::ResourceMissing(_)));
    assert_eq!(f.count_topic(PERMISSIONS_DELETED), 1);
    assert!(f.rbac.get_resource_permissions("/files/gone.txt").unwrap_err().is_not_found());
    assert!(f.rbac.subject_paths(SubjectType::Account, &id("alice")).unwrap().is_empty());
    assert!(f.rbac.get_share(common::DOMAIN, "/files/gone.txt").unwrap().is_none());
}

/// Records of other resource types are never checked against the file tree
#[test]
fn non_file_records_survive() {
    let f = Fixture::new();
    f.account("alice");
    let perms = Permissions::new("/blog/post-1", "post").allow(allow("read", &["alice"]));
    f.rbac.set_resource_permissions("/blog/post-1", "post", perms).unwrap();

    assert!(f.rbac.get_resource_permissions("/blog/post-1").is_ok());
}

/// Files inside `.hidden` are never cleaned up
#[test]
fn hidden_files_are_kept() {
    let f = Fixture::new();
    f.account("alice");
    let perms = Permissions::new("/files/.hidden/cache", "file").allow(allow("read", &["alice"]));
    f.rbac.set_resource_permissions("/files/.hidden/cache", "file", perms).unwrap();

    assert!(f.rbac.get_resource_permissions("/files/.hidden/cache").is_ok());
}
