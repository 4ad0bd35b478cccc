//! The engine and its owned state

use std::sync::Arc;

use tracing::warn;

use crate::cache::{PathLocks, PermissionCache};
use crate::cancel::Cancel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::files::Files;
use crate::model::Permissions;
use crate::store::Store;
use crate::subject::{DeadlineDirectory, Directory, SubjectId, SubjectType};

/// Resource authorization engine.
///
/// Owns the cache and the path locks for its whole lifetime; every
/// collaborator is injected. Cheap to share behind an `Arc`.
pub struct Rbac {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) files: Arc<dyn Files>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) cache: PermissionCache,
    pub(crate) locks: PathLocks,
    pub(crate) config: Config,
}

impl Rbac {
    /// Build an engine. When `config.lookup_timeout_ms` is set, directory
    /// lookups are bounded by that deadline and by `max_pending_lookups`.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        directory: Arc<dyn Directory>,
        files: Arc<dyn Files>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let directory: Arc<dyn Directory> = match config.lookup_timeout() {
            Some(t) => Arc::new(DeadlineDirectory::new(directory, t).with_max_pending(config.max_pending_lookups)),
            None => directory,
        };
        Rbac {
            cache: PermissionCache::new(config.cache_capacity),
            locks: PathLocks::new(),
            store,
            directory,
            files,
            events,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn qualify(&self, id: &str) -> SubjectId {
        SubjectId::qualify(id, &self.config.domain)
    }

    /// Canonical id for a known subject, `None` if the directory has no such subject
    pub(crate) fn resolve(&self, kind: SubjectType, id: &str) -> Result<Option<SubjectId>> {
        if id.is_empty() {
            return Ok(None);
        }
        self.directory.exists(kind, id)
    }

    /// Like [`resolve`](Self::resolve) but unknown subjects are an error.
    pub(crate) fn require(&self, kind: SubjectType, id: &str) -> Result<SubjectId> {
        if id.is_empty() {
            return Err(Error::Validation(format!("empty {kind} id")));
        }
        self.resolve(kind, id)?
            .ok_or_else(|| Error::SubjectNotFound { kind, id: id.to_string() })
    }

    /// Canonical id if known, else the domain-qualified input. Used when
    /// tearing down state for subjects that may already be gone.
    pub(crate) fn resolve_or_qualify(&self, kind: SubjectType, id: &str) -> Result<SubjectId> {
        Ok(match self.resolve(kind, id)? {
            Some(id) => id,
            None if kind.is_domain_scoped() => self.qualify(id),
            None => SubjectId::from(id),
        })
    }

    pub(crate) fn is_service_account(&self, kind: SubjectType, id: &SubjectId) -> bool {
        kind == SubjectType::Account && *id == self.config.service_account_id()
    }

    pub(crate) fn scan_token(&self) -> Cancel {
        self.config.scan_timeout().map(Cancel::with_timeout).unwrap_or_default()
    }

    /// Publish a record change; sink failures never fail the mutation.
    pub(crate) fn publish(&self, topic: &str, perms: &Permissions) {
        let payload = match serde_json::to_vec(perms) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %perms.path, error = %e, "cannot encode event payload");
                return;
            }
        };
        if let Err(e) = self.events.publish(topic, &payload) {
            warn!(topic, path = %perms.path, error = %e, "event publish failed");
        }
    }
}
