//! Subjects and the directory that resolves them
//!
//! The directory is an external collaborator: it answers whether a subject
//! exists (returning its canonical id) and hands out membership lists used
//! to walk group and organization graphs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Closed set of subject kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    Account,
    Application,
    Group,
    Organization,
    Peer,
    Role,
    NodeIdentity,
}

impl SubjectType {
    /// Kinds that can appear inside a permission rule. Roles never do.
    pub const GRANTABLE: [SubjectType; 6] = [
        SubjectType::Account,
        SubjectType::Application,
        SubjectType::Group,
        SubjectType::Organization,
        SubjectType::Peer,
        SubjectType::NodeIdentity,
    ];

    /// Upper-case name used in storage keys.
    pub fn key_name(self) -> &'static str {
        match self {
            SubjectType::Account => "ACCOUNT",
            SubjectType::Application => "APPLICATION",
            SubjectType::Group => "GROUP",
            SubjectType::Organization => "ORGANIZATION",
            SubjectType::Peer => "PEER",
            SubjectType::Role => "ROLE",
            SubjectType::NodeIdentity => "NODE_IDENTITY",
        }
    }

    /// Peers and node identities are addressed by a bare id, never `id@domain`.
    pub fn is_domain_scoped(self) -> bool {
        !matches!(self, SubjectType::Peer | SubjectType::NodeIdentity)
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubjectType::Account => "account",
            SubjectType::Application => "application",
            SubjectType::Group => "group",
            SubjectType::Organization => "organization",
            SubjectType::Peer => "peer",
            SubjectType::Role => "role",
            SubjectType::NodeIdentity => "node identity",
        };
        f.write_str(s)
    }
}

/// Canonical subject id as returned by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    /// Append `@domain` to a bare id; ids that already carry a domain are kept.
    pub fn qualify(id: &str, domain: &str) -> Self {
        if id.is_empty() || id.contains('@') {
            SubjectId(id.to_string())
        } else {
            SubjectId(format!("{id}@{domain}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before `@`.
    pub fn local(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(l, _)| l)
    }

    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, d)| d)
    }

    /// Loose comparison against caller input that may omit the domain.
    pub fn same_as(&self, raw: &str, domain: &str) -> bool {
        self.0 == raw || *self == SubjectId::qualify(raw, domain)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        SubjectId(s.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        SubjectId(s)
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub id: SubjectId,
    pub groups: Vec<SubjectId>,
    pub organizations: Vec<SubjectId>,
    pub roles: Vec<SubjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct Group {
    pub id: SubjectId,
    /// Member accounts.
    pub accounts: Vec<SubjectId>,
    /// Groups this group is itself a member of.
    pub groups: Vec<SubjectId>,
    pub organizations: Vec<SubjectId>,
    pub roles: Vec<SubjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct Organization {
    pub id: SubjectId,
    pub accounts: Vec<SubjectId>,
    pub groups: Vec<SubjectId>,
    pub roles: Vec<SubjectId>,
    pub applications: Vec<SubjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct Role {
    pub id: SubjectId,
    /// Method patterns, see [`matches_action`](crate::matches_action).
    pub actions: Vec<String>,
    pub accounts: Vec<SubjectId>,
    pub organizations: Vec<SubjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct Application {
    pub id: SubjectId,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Peer {
    pub id: SubjectId,
    pub actions: Vec<String>,
}

/// Lookup service for subjects and their memberships.
///
/// Every method takes ids as given by callers; implementations decide how
/// to canonicalize them. `exists` returns the canonical id on success.
pub trait Directory: Send + Sync {
    fn exists(&self, kind: SubjectType, id: &str) -> Result<Option<SubjectId>>;
    fn account(&self, id: &str) -> Result<Option<Account>>;
    fn group(&self, id: &str) -> Result<Option<Group>>;
    fn organization(&self, id: &str) -> Result<Option<Organization>>;
    fn role(&self, id: &str) -> Result<Option<Role>>;
    fn application(&self, id: &str) -> Result<Option<Application>>;
    fn peer(&self, id: &str) -> Result<Option<Peer>>;
    fn groups(&self) -> Result<Vec<Group>>;
    fn organizations(&self) -> Result<Vec<Organization>>;
    fn roles(&self) -> Result<Vec<Role>>;
}

#[derive(Default)]
struct Entries {
    accounts: HashMap<SubjectId, Account>,
    groups: HashMap<SubjectId, Group>,
    organizations: HashMap<SubjectId, Organization>,
    roles: HashMap<SubjectId, Role>,
    applications: HashMap<SubjectId, Application>,
    peers: HashMap<SubjectId, Peer>,
    node_identities: HashSet<SubjectId>,
}

/// In-process directory, keyed by canonical `id@domain`.
pub struct MemoryDirectory {
    domain: String,
    entries: RwLock<Entries>,
}

impl MemoryDirectory {
    pub fn new(domain: impl Into<String>) -> Self {
        MemoryDirectory { domain: domain.into(), entries: RwLock::new(Entries::default()) }
    }

    fn canonical(&self, kind: SubjectType, id: &str) -> SubjectId {
        if kind.is_domain_scoped() {
            SubjectId::qualify(id, &self.domain)
        } else {
            SubjectId::from(id)
        }
    }

    pub fn add_account(&self, a: Account) {
        self.entries.write().accounts.insert(a.id.clone(), a);
    }

    pub fn add_group(&self, g: Group) {
        self.entries.write().groups.insert(g.id.clone(), g);
    }

    pub fn add_organization(&self, o: Organization) {
        self.entries.write().organizations.insert(o.id.clone(), o);
    }

    pub fn add_role(&self, r: Role) {
        self.entries.write().roles.insert(r.id.clone(), r);
    }

    pub fn add_application(&self, a: Application) {
        self.entries.write().applications.insert(a.id.clone(), a);
    }

    pub fn add_peer(&self, p: Peer) {
        self.entries.write().peers.insert(p.id.clone(), p);
    }

    pub fn add_node_identity(&self, id: impl Into<SubjectId>) {
        self.entries.write().node_identities.insert(id.into());
    }

    /// Drop a subject; permission records keep referencing it until cleanup.
    pub fn remove(&self, kind: SubjectType, id: &str) -> bool {
        let id = self.canonical(kind, id);
        let mut e = self.entries.write();
        match kind {
            SubjectType::Account => e.accounts.remove(&id).is_some(),
            SubjectType::Group => e.groups.remove(&id).is_some(),
            SubjectType::Organization => e.organizations.remove(&id).is_some(),
            SubjectType::Role => e.roles.remove(&id).is_some(),
            SubjectType::Application => e.applications.remove(&id).is_some(),
            SubjectType::Peer => e.peers.remove(&id).is_some(),
            SubjectType::NodeIdentity => e.node_identities.remove(&id),
        }
    }
}

impl Directory for MemoryDirectory {
    fn exists(&self, kind: SubjectType, id: &str) -> Result<Option<SubjectId>> {
        if id.is_empty() {
            return Ok(None);
        }
        let id = self.canonical(kind, id);
        let e = self.entries.read();
        let found = match kind {
            SubjectType::Account => e.accounts.contains_key(&id),
            SubjectType::Group => e.groups.contains_key(&id),
            SubjectType::Organization => e.organizations.contains_key(&id),
            SubjectType::Role => e.roles.contains_key(&id),
            SubjectType::Application => e.applications.contains_key(&id),
            SubjectType::Peer => e.peers.contains_key(&id),
            SubjectType::NodeIdentity => e.node_identities.contains(&id),
        };
        Ok(found.then_some(id))
    }

    fn account(&self, id: &str) -> Result<Option<Account>> {
        let id = self.canonical(SubjectType::Account, id);
        Ok(self.entries.read().accounts.get(&id).cloned())
    }

    fn group(&self, id: &str) -> Result<Option<Group>> {
        let id = self.canonical(SubjectType::Group, id);
        Ok(self.entries.read().groups.get(&id).cloned())
    }

    fn organization(&self, id: &str) -> Result<Option<Organization>> {
        let id = self.canonical(SubjectType::Organization, id);
        Ok(self.entries.read().organizations.get(&id).cloned())
    }

    fn role(&self, id: &str) -> Result<Option<Role>> {
        let id = self.canonical(SubjectType::Role, id);
        Ok(self.entries.read().roles.get(&id).cloned())
    }

    fn application(&self, id: &str) -> Result<Option<Application>> {
        let id = self.canonical(SubjectType::Application, id);
        Ok(self.entries.read().applications.get(&id).cloned())
    }

    fn peer(&self, id: &str) -> Result<Option<Peer>> {
        Ok(self.entries.read().peers.get(&SubjectId::from(id)).cloned())
    }

    fn groups(&self) -> Result<Vec<Group>> {
        Ok(self.entries.read().groups.values().cloned().collect())
    }

    fn organizations(&self) -> Result<Vec<Organization>> {
        Ok(self.entries.read().organizations.values().cloned().collect())
    }

    fn roles(&self) -> Result<Vec<Role>> {
        Ok(self.entries.read().roles.values().cloned().collect())
    }
}

/// Bounds every lookup of an inner directory by a deadline.
///
/// Each call runs on a helper thread; when the deadline passes the caller
/// gets [`Error::Timeout`] and the late answer is discarded. At most
/// `max_pending` helpers exist at once. Past that, calls fail immediately
/// until a stuck lookup returns.
pub struct DeadlineDirectory {
    inner: Arc<dyn Directory>,
    timeout: Duration,
    max_pending: usize,
    pending: Arc<AtomicUsize>,
}

/// A reserved helper slot, released when the helper thread ends.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeadlineDirectory {
    pub const DEFAULT_MAX_PENDING: usize = 64;

    pub fn new(inner: Arc<dyn Directory>, timeout: Duration) -> Self {
        DeadlineDirectory { inner, timeout, max_pending: Self::DEFAULT_MAX_PENDING, pending: Arc::default() }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Lookups whose helper thread has not finished yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn reserve(&self) -> Option<Slot> {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.max_pending).then_some(n + 1))
            .ok()
            .map(|_| Slot(Arc::clone(&self.pending)))
    }

    fn call<T, F>(&self, what: String, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Directory) -> Result<T> + Send + 'static,
    {
        let Some(slot) = self.reserve() else {
            tracing::warn!(lookup = %what, max_pending = self.max_pending, "directory lookups saturated");
            return Err(Error::Timeout(format!("directory lookup {what}: {} lookups still pending", self.max_pending)));
        };
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::sync_channel(1);
        std::thread::Builder::new().name("directory-lookup".into()).spawn(move || {
            let _slot = slot;
            let _ = tx.send(f(inner.as_ref()));
        })?;
        match rx.recv_timeout(self.timeout) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(lookup = %what, timeout_ms = self.timeout.as_millis() as u64, "directory lookup timed out");
                Err(Error::Timeout(format!("directory lookup {what}")))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Storage(format!("directory lookup {what} aborted")))
            }
        }
    }
}

impl Directory for DeadlineDirectory {
    fn exists(&self, kind: SubjectType, id: &str) -> Result<Option<SubjectId>> {
        let id = id.to_string();
        self.call(format!("{kind} {id}"), move |d| d.exists(kind, &id))
    }

    fn account(&self, id: &str) -> Result<Option<Account>> {
        let id = id.to_string();
        self.call(format!("account {id}"), move |d| d.account(&id))
    }

    fn group(&self, id: &str) -> Result<Option<Group>> {
        let id = id.to_string();
        self.call(format!("group {id}"), move |d| d.group(&id))
    }

    fn organization(&self, id: &str) -> Result<Option<Organization>> {
        let id = id.to_string();
        self.call(format!("organization {id}"), move |d| d.organization(&id))
    }

    fn role(&self, id: &str) -> Result<Option<Role>> {
        let id = id.to_string();
        self.call(format!("role {id}"), move |d| d.role(&id))
    }

    fn application(&self, id: &str) -> Result<Option<Application>> {
        let id = id.to_string();
        self.call(format!("application {id}"), move |d| d.application(&id))
    }

    fn peer(&self, id: &str) -> Result<Option<Peer>> {
        let id = id.to_string();
        self.call(format!("peer {id}"), move |d| d.peer(&id))
    }

    fn groups(&self) -> Result<Vec<Group>> {
        self.call("groups".into(), |d| d.groups())
    }

    fn organizations(&self) -> Result<Vec<Organization>> {
        self.call("organizations".into(), |d| d.organizations())
    }

    fn roles(&self) -> Result<Vec<Role>> {
        self.call("roles".into(), |d| d.roles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs a hook before answering `exists`.
    struct Hooked(MemoryDirectory, Box<dyn Fn() + Send + Sync>);

    impl Directory for Hooked {
        fn exists(&self, kind: SubjectType, id: &str) -> Result<Option<SubjectId>> {
            (self.1)();
            self.0.exists(kind, id)
        }
        fn account(&self, id: &str) -> Result<Option<Account>> {
            self.0.account(id)
        }
        fn group(&self, id: &str) -> Result<Option<Group>> {
            self.0.group(id)
        }
        fn organization(&self, id: &str) -> Result<Option<Organization>> {
            self.0.organization(id)
        }
        fn role(&self, id: &str) -> Result<Option<Role>> {
            self.0.role(id)
        }
        fn application(&self, id: &str) -> Result<Option<Application>> {
            self.0.application(id)
        }
        fn peer(&self, id: &str) -> Result<Option<Peer>> {
            self.0.peer(id)
        }
        fn groups(&self) -> Result<Vec<Group>> {
            self.0.groups()
        }
        fn organizations(&self) -> Result<Vec<Organization>> {
            self.0.organizations()
        }
        fn roles(&self) -> Result<Vec<Role>> {
            self.0.roles()
        }
    }

    fn with_alice() -> MemoryDirectory {
        let dir = MemoryDirectory::new("x.io");
        dir.add_account(Account { id: SubjectId::new("alice@x.io"), ..Default::default() });
        dir
    }

    #[test]
    fn test_qualify() {
        assert_eq!(SubjectId::qualify("alice", "x.io").as_str(), "alice@x.io");
        assert_eq!(SubjectId::qualify("alice@y.io", "x.io").as_str(), "alice@y.io");
        let id = SubjectId::new("alice@x.io");
        assert_eq!((id.local(), id.domain()), ("alice", Some("x.io")));
        assert!(id.same_as("alice", "x.io"));
        assert!(!id.same_as("alice", "y.io"));
    }

    #[test]
    fn test_memory_directory_canonical_ids() {
        let dir = MemoryDirectory::new("x.io");
        dir.add_account(Account { id: SubjectId::new("alice@x.io"), ..Default::default() });
        dir.add_node_identity("node-1");

        assert_eq!(dir.exists(SubjectType::Account, "alice").unwrap(), Some(SubjectId::new("alice@x.io")));
        assert_eq!(dir.exists(SubjectType::NodeIdentity, "node-1").unwrap(), Some(SubjectId::new("node-1")));
        assert_eq!(dir.exists(SubjectType::Group, "alice").unwrap(), None);
        assert!(dir.remove(SubjectType::Account, "alice"));
        assert_eq!(dir.exists(SubjectType::Account, "alice@x.io").unwrap(), None);
    }

    #[test]
    fn test_deadline() {
        let slow = Arc::new(Hooked(with_alice(), Box::new(|| std::thread::sleep(Duration::from_millis(200)))));

        let strict = DeadlineDirectory::new(slow.clone(), Duration::from_millis(20));
        assert!(matches!(strict.exists(SubjectType::Account, "alice"), Err(Error::Timeout(_))));
        assert!(strict.account("alice").unwrap().is_some());

        let lenient = DeadlineDirectory::new(slow, Duration::from_secs(5));
        assert!(lenient.exists(SubjectType::Account, "alice").unwrap().is_some());
    }

    /// A hung directory ties up at most `max_pending` helper threads
    #[test]
    fn test_pending_lookups_are_capped() {
        let gate = Arc::new(parking_lot::Mutex::new(()));
        let entered = Arc::new(AtomicUsize::new(0));
        let hook = {
            let (gate, entered) = (Arc::clone(&gate), Arc::clone(&entered));
            move || {
                entered.fetch_add(1, Ordering::SeqCst);
                drop(gate.lock());
            }
        };
        let hung = Arc::new(Hooked(with_alice(), Box::new(hook)));
        let dir = DeadlineDirectory::new(hung, Duration::from_millis(50)).with_max_pending(2);

        let held = gate.lock();
        for _ in 0..10 {
            assert!(matches!(dir.exists(SubjectType::Account, "alice"), Err(Error::Timeout(_))));
        }
        assert_eq!(dir.pending(), 2);
        assert!(entered.load(Ordering::SeqCst) <= 2);
        drop(held);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while dir.pending() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(dir.pending(), 0);
        assert_eq!(entered.load(Ordering::SeqCst), 2);
        assert!(dir.exists(SubjectType::Account, "alice").unwrap().is_some());
    }
}
