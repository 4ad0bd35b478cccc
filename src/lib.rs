//! Pathguard - path-based resource authorization
//!
//! Permission records are attached to slash-separated resource paths and
//! inherited by everything below them. An [`Rbac`] engine answers
//! "can this subject do that here" and keeps the supporting state
//! (reverse indices, shares, space counters, role bindings) consistent.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pathguard::*;
//!
//! # fn main() -> pathguard::Result<()> {
//! let directory = Arc::new(MemoryDirectory::new("localhost"));
//! directory.add_account(Account { id: "alice@localhost".into(), ..Default::default() });
//!
//! let config = Config::load("/etc/pathguard.json")?;
//! let store = Arc::new(LmdbStore::open_with("/tmp/pathguard", &config)?);
//! let files = Arc::new(LocalFiles::from_config("/srv/files", &config));
//! let rbac = Rbac::new(config, store, directory, files, Arc::new(NoopEvents));
//!
//! let perms = Permissions::new("/projects", "folder")
//!     .allow(Permission::new("read").with(SubjectType::Account, "alice"));
//! rbac.set_resource_permissions("/projects", "folder", perms)?;
//!
//! let access = rbac.validate_access("alice", SubjectType::Account, "read", "/projects/q3/plan.md")?;
//! assert!(access.has_access);
//! # Ok(())
//! # }
//! ```

mod access;
mod action;
mod bindings;
mod cache;
mod cancel;
mod cleanup;
mod config;
mod engine;
mod enumerate;
mod error;
mod events;
mod files;
mod index;
mod keys;
mod model;
mod permissions;
mod quota;
mod sharing;
mod store;
mod subject;

pub use access::{ancestors, OWNER, READ};
pub use action::{canonicalize_action, matches_action};
pub use bindings::Caller;
pub use cache::{PathLocks, PermissionCache};
pub use cancel::Cancel;
pub use config::Config;
pub use engine::Rbac;
pub use enumerate::PermissionBatches;
pub use error::{Error, Result};
pub use events::{EventSink, MemoryEvents, NoopEvents, PERMISSIONS_DELETED, PERMISSIONS_SET};
pub use files::{is_hidden, is_under, FileStat, Files, LocalFiles};
pub use keys::{share_id, Key};
pub use model::{Access, Permission, PermissionType, Permissions, ResourceInfos, RoleBinding, Share};
pub use store::{LmdbStore, MemoryStore, Store};
pub use subject::{
    Account, Application, DeadlineDirectory, Directory, Group, MemoryDirectory, Organization, Peer, Role,
    SubjectId, SubjectType,
};
