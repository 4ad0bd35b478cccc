//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::subject::{DeadlineDirectory, SubjectId};

/// Runtime configuration for an [`Rbac`](crate::Rbac) instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local domain appended to bare subject ids.
    pub domain: String,
    /// Service account id (without domain); has full access everywhere.
    pub service_account: String,
    /// Local role name that grants every action.
    pub admin_role: String,
    /// Directories whose content falls back to read-only when rules exist but none match.
    pub public_dirs: Vec<String>,
    /// Action patterns allowed without resource arguments regardless of roles.
    pub open_actions: Vec<String>,
    pub cache_capacity: usize,
    /// Records per message for streaming enumeration.
    pub batch_size: usize,
    pub max_membership_depth: usize,
    pub lookup_timeout_ms: Option<u64>,
    /// Timed directory lookups allowed in flight before new ones fail fast.
    pub max_pending_lookups: usize,
    pub scan_timeout_ms: Option<u64>,
    /// LMDB map size in bytes.
    pub map_size: usize,
    /// Resource type whose owners are charged for on-disk size.
    pub file_resource_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: "localhost".into(),
            service_account: "sa".into(),
            admin_role: "admin".into(),
            public_dirs: Vec::new(),
            open_actions: vec![
                "/echo.EchoService/*".into(),
                "/resource.ResourceService/*".into(),
                "/event.EventService/*".into(),
                "/file.FileService/GetFileInfo".into(),
            ],
            cache_capacity: 10_000,
            batch_size: 25,
            max_membership_depth: 16,
            lookup_timeout_ms: Some(5_000),
            max_pending_lookups: DeadlineDirectory::DEFAULT_MAX_PENDING,
            scan_timeout_ms: None,
            map_size: 1 << 30,
            file_resource_type: "file".into(),
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Canonical id of the service account (`sa@domain`).
    pub fn service_account_id(&self) -> SubjectId {
        SubjectId::qualify(&self.service_account, &self.domain)
    }

    /// Canonical id of the local admin role.
    pub fn admin_role_id(&self) -> SubjectId {
        SubjectId::qualify(&self.admin_role, &self.domain)
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout_ms.map(Duration::from_millis)
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = Config::from_json(r#"{"domain": "example.com", "batch_size": 10}"#).unwrap();
        assert_eq!(c.domain, "example.com");
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.cache_capacity, 10_000);
        assert_eq!(c.service_account_id().as_str(), "sa@example.com");
        assert_eq!(c.admin_role_id().as_str(), "admin@example.com");
    }

    #[test]
    fn test_timeouts() {
        let c = Config::default();
        assert_eq!(c.lookup_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(c.scan_timeout(), None);
    }
}
