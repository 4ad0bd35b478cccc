//! Method-level authorization tests

mod common;

use common::{allow, Fixture};
use pathguard::*;
use proptest::prelude::*;

const CREATE_ACCOUNT: &str = "/rbac.RbacService/CreateAccount";
const READ_FILE: &str = "/file.FileService/ReadFile";

// ============================================================================
// Canonicalization
// ============================================================================

#[test]
fn bypass_attempts_are_rejected() {
    assert!(canonicalize_action("/svc.Service/./Method").is_err());
    assert!(canonicalize_action("/svc.Service/../admin.Admin/Method").is_err());
    assert_eq!(canonicalize_action("/svc.Service//Method").unwrap(), "/svc.Service/Method");
}

proptest! {
    #[test]
    fn canonicalization_is_idempotent(action in "/[a-zA-Z./*]{0,12}/{1,3}[a-zA-Z.*]{0,12}") {
        if let Ok(once) = canonicalize_action(&action) {
            prop_assert_eq!(canonicalize_action(&once).unwrap(), once);
        }
    }

    #[test]
    fn arbitrary_input_never_panics(action in "\\PC{0,40}") {
        let _ = canonicalize_action(&action);
        let _ = matches_action("/*", &action);
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// Roles assigned on the account record grant their actions
#[test]
fn account_roles() {
    let f = Fixture::new();
    f.role("editor", &["/file.FileService/*"]);
    f.account_with_roles("alice", &["editor"]);

    let ok = f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &[]).unwrap();
    assert_eq!(ok, Access::GRANTED);
    let no = f.rbac.validate_action(CREATE_ACCOUNT, "alice", SubjectType::Account, &[]).unwrap();
    assert_eq!(no, Access::DENIED);
}

/// The local admin role grants every action
#[test]
fn admin_role() {
    let f = Fixture::new();
    f.role("admin", &[]);
    f.account_with_roles("alice", &["admin"]);

    let got = f.rbac.validate_action(CREATE_ACCOUNT, "alice", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::GRANTED);
    let role = f.rbac.validate_action(CREATE_ACCOUNT, "admin", SubjectType::Role, &[]).unwrap();
    assert_eq!(role, Access::GRANTED);
}

/// A role listing the account grants without the account naming the role
#[test]
fn roles_listing_the_account() {
    let f = Fixture::new();
    f.account("bob");
    f.directory.add_role(Role {
        id: common::id("viewer"),
        actions: vec!["/blog.BlogService/GetPost".into()],
        accounts: vec![SubjectId::from("bob")],
        ..Default::default()
    });

    let got = f.rbac.validate_action("/blog.BlogService/GetPost", "bob", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::GRANTED);
}

/// Roles of the account's groups are consulted last
#[test]
fn group_roles() {
    let f = Fixture::new();
    f.role("editor", &["/file.FileService/*"]);
    f.directory.add_group(Group {
        id: common::id("eng"),
        roles: vec![SubjectId::from("editor")],
        ..Default::default()
    });
    f.account_in("alice", &["eng"], &[]);

    let got = f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::GRANTED);
}

#[test]
fn applications_use_their_own_actions() {
    let f = Fixture::new();
    f.directory.add_application(Application {
        id: common::id("indexer"),
        actions: vec!["/search.SearchService/*".into()],
    });

    let ok = f.rbac.validate_action("/search.SearchService/Index", "indexer", SubjectType::Application, &[]).unwrap();
    assert_eq!(ok, Access::GRANTED);
    let no = f.rbac.validate_action(CREATE_ACCOUNT, "indexer", SubjectType::Application, &[]).unwrap();
    assert_eq!(no, Access::DENIED);
}

#[test]
fn service_account_has_every_method() {
    let f = Fixture::new();
    let got = f.rbac.validate_action(CREATE_ACCOUNT, "sa", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::GRANTED);
}

/// Infrastructure methods are open when no resources are involved
#[test]
fn open_actions() {
    let f = Fixture::new();
    let got = f.rbac.validate_action("/echo.EchoService/Echo", "nobody", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::GRANTED);
}

/// A malformed action never matches a pattern
#[test]
fn malformed_action_fails_closed() {
    let f = Fixture::new();
    f.role("ops", &["/*"]);
    f.account_with_roles("alice", &["ops"]);

    let got = f.rbac.validate_action("/rbac.RbacService/../x", "alice", SubjectType::Account, &[]).unwrap();
    assert_eq!(got, Access::DENIED);
    assert!(matches!(
        f.rbac.validate_action("", "alice", SubjectType::Account, &[]),
        Err(Error::Validation(_))
    ));
}

// ============================================================================
// Resource infos
// ============================================================================

#[test]
fn resource_infos_are_stored_canonically() {
    let f = Fixture::new();
    let infos = vec![ResourceInfos::new(0, "read").at("/ignored")];
    f.rbac.set_action_resource_infos("/file.FileService//ReadFile", infos).unwrap();

    let got = f.rbac.get_action_resource_infos(READ_FILE).unwrap();
    assert_eq!(got, vec![ResourceInfos::new(0, "read")]);
    assert!(f.rbac.get_action_resource_infos(CREATE_ACCOUNT).unwrap().is_empty());
}

/// A granted method is still subject to the resource check
#[test]
fn method_grant_then_resource_check() {
    let f = Fixture::new();
    f.role("editor", &["/file.FileService/*"]);
    f.account_with_roles("alice", &["editor"]);
    let perms = Permissions::new("/secret", "folder").deny(allow("read", &["alice"]));
    f.rbac.set_resource_permissions("/secret", "folder", perms).unwrap();
    f.rbac.set_action_resource_infos(READ_FILE, vec![ResourceInfos::new(0, "read")]).unwrap();

    let denied = [ResourceInfos::new(0, "read").at("/secret/plan.txt")];
    assert_eq!(f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &denied).unwrap(), Access::DENIED);

    let open = [ResourceInfos::new(0, "read").at("/elsewhere/plan.txt")];
    assert_eq!(f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &open).unwrap(), Access::GRANTED);
}

/// Only the first resource carrying a path is checked
#[test]
fn first_resource_with_a_path_decides() {
    let f = Fixture::new();
    f.role("editor", &["/file.FileService/*"]);
    f.account_with_roles("alice", &["editor"]);
    let perms = Permissions::new("/secret", "folder").deny(allow("read", &["alice"]));
    f.rbac.set_resource_permissions("/secret", "folder", perms).unwrap();
    f.rbac.set_action_resource_infos(READ_FILE, vec![ResourceInfos::new(0, "read")]).unwrap();

    let resources = [
        ResourceInfos::new(0, "read"),
        ResourceInfos::new(1, "read").at("/open"),
        ResourceInfos::new(2, "read").at("/secret"),
    ];
    let got = f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &resources).unwrap();
    assert_eq!(got, Access::GRANTED);
}

/// Passing resources for a method with nothing registered is an error
#[test]
fn unregistered_resource_infos() {
    let f = Fixture::new();
    f.role("editor", &["/file.FileService/*"]);
    f.account_with_roles("alice", &["editor"]);

    let resources = [ResourceInfos::new(0, "read").at("/a")];
    let err = f.rbac.validate_action(READ_FILE, "alice", SubjectType::Account, &resources).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
