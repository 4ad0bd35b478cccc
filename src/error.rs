//! Error types for pathguard

use thiserror::Error;

use crate::subject::SubjectType;

/// The main error type for authorization operations.
///
/// Denials are not errors: a matched deny rule comes back as an
/// [`Access`](crate::Access) value with `access_denied` set.
#[derive(Error, Debug)]
pub enum Error {
    /// Record or key absent from the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Subject id did not resolve in the directory.
    #[error("no {kind} exists with id {id}")]
    SubjectNotFound { kind: SubjectType, id: String },

    /// Empty or malformed input rejected at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Action name failed canonicalization.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Caller is not allowed to run a management operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The file backing a resource no longer exists.
    #[error("resource {0} no longer exists")]
    ResourceMissing(String),

    /// Used space exceeds allocated space.
    #[error("no space available: {0}")]
    NoSpace(String),

    /// Group/organization walk went deeper than the configured limit.
    #[error("membership graph deeper than {0} levels")]
    MembershipTooDeep(usize),

    /// Directory lookup did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A long scan was interrupted.
    #[error("operation cancelled")]
    Cancelled,

    /// Backend storage failure.
    #[error("storage: {0}")]
    Storage(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors callers may read as "nothing stored here".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for pathguard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Convert any backend error to [`Error::Storage`]
pub fn err<E: std::error::Error>(e: E) -> Error {
    Error::Storage(e.to_string())
}
