//! Shared fixture: an engine over a temp LMDB store and a temp file tree.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use pathguard::*;
use tempfile::TempDir;

pub const DOMAIN: &str = "localhost";

pub struct Fixture {
    pub rbac: Rbac,
    pub store: Arc<LmdbStore>,
    pub directory: Arc<MemoryDirectory>,
    pub events: Arc<MemoryEvents>,
    pub files_root: PathBuf,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build(tweak, |d| d as Arc<dyn Directory>)
    }

    /// Engine whose directory is `wrap` applied to the in-memory one.
    pub fn with_directory(wrap: impl FnOnce(Arc<MemoryDirectory>) -> Arc<dyn Directory>) -> Self {
        Self::build(|_| {}, wrap)
    }

    fn build(
        tweak: impl FnOnce(&mut Config),
        wrap: impl FnOnce(Arc<MemoryDirectory>) -> Arc<dyn Directory>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            lookup_timeout_ms: None,
            public_dirs: vec!["/public".into()],
            map_size: 1 << 26,
            ..Config::default()
        };
        tweak(&mut config);

        let store = Arc::new(LmdbStore::open_with(dir.path().join("db"), &config).unwrap());
        let directory = Arc::new(MemoryDirectory::new(DOMAIN));
        let events = Arc::new(MemoryEvents::new());
        let files_root = dir.path().join("files");
        std::fs::create_dir_all(&files_root).unwrap();
        let files = Arc::new(LocalFiles::from_config(&files_root, &config));

        directory.add_account(Account { id: id("sa"), ..Default::default() });

        let rbac = Rbac::new(config, store.clone(), wrap(directory.clone()), files, events.clone());
        Fixture { rbac, store, directory, events, files_root, _dir: dir }
    }

    pub fn account(&self, name: &str) {
        self.account_in(name, &[], &[]);
    }

    pub fn account_in(&self, name: &str, groups: &[&str], organizations: &[&str]) {
        self.directory.add_account(Account {
            id: id(name),
            groups: groups.iter().map(|g| SubjectId::from(*g)).collect(),
            organizations: organizations.iter().map(|o| SubjectId::from(*o)).collect(),
            ..Default::default()
        });
    }

    pub fn account_with_roles(&self, name: &str, roles: &[&str]) {
        self.directory.add_account(Account {
            id: id(name),
            roles: roles.iter().map(|r| SubjectId::from(*r)).collect(),
            ..Default::default()
        });
    }

    pub fn group(&self, name: &str, parents: &[&str]) {
        self.directory.add_group(Group {
            id: id(name),
            groups: parents.iter().map(|g| SubjectId::from(*g)).collect(),
            ..Default::default()
        });
    }

    pub fn role(&self, name: &str, actions: &[&str]) {
        self.directory.add_role(Role {
            id: id(name),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        });
    }

    /// Create a file of `size` bytes at a resource path.
    pub fn write_file(&self, path: &str, size: usize) {
        let host = self.host(path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(host, vec![0u8; size]).unwrap();
    }

    pub fn mkdir(&self, path: &str) {
        std::fs::create_dir_all(self.host(path)).unwrap();
    }

    pub fn remove_file(&self, path: &str) {
        std::fs::remove_file(self.host(path)).unwrap();
    }

    fn host(&self, path: &str) -> PathBuf {
        self.files_root.join(path.trim_start_matches('/'))
    }

    pub fn access(&self, subject: &str, permission: &str, path: &str) -> Access {
        self.rbac.validate_access(subject, SubjectType::Account, permission, path).unwrap()
    }

    pub fn count_topic(&self, topic: &str) -> usize {
        self.events.topics().iter().filter(|t| *t == topic).count()
    }
}

pub fn id(name: &str) -> SubjectId {
    SubjectId::qualify(name, DOMAIN)
}

pub fn allow(name: &str, accounts: &[&str]) -> Permission {
    accounts.iter().fold(Permission::new(name), |p, a| p.with(SubjectType::Account, *a))
}
