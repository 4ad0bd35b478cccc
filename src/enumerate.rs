//! Batched enumeration of permission records

use tracing::debug;

use crate::cancel::Cancel;
use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::model::Permissions;
use crate::subject::SubjectType;

/// Yields records in batches of `Config::batch_size`. Paths whose record
/// is gone or unreadable are skipped; any other error ends the iteration.
pub struct PermissionBatches<'a> {
    rbac: &'a Rbac,
    paths: std::vec::IntoIter<String>,
    resource_type: Option<String>,
    batch: usize,
    cancel: Cancel,
    done: bool,
}

impl<'a> PermissionBatches<'a> {
    fn new(rbac: &'a Rbac, paths: Vec<String>, resource_type: Option<String>) -> Self {
        PermissionBatches {
            rbac,
            paths: paths.into_iter(),
            resource_type,
            batch: rbac.config.batch_size.max(1),
            cancel: rbac.scan_token(),
            done: false,
        }
    }

    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    fn fail(&mut self, e: Error) -> Option<Result<Vec<Permissions>>> {
        self.done = true;
        Some(Err(e))
    }
}

impl Iterator for PermissionBatches<'_> {
    type Item = Result<Vec<Permissions>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut out = Vec::with_capacity(self.batch);
        while out.len() < self.batch {
            let Some(path) = self.paths.next() else { break };
            if let Err(e) = self.cancel.check() {
                return self.fail(e);
            }
            match self.rbac.lookup(&path) {
                Ok(Some(p)) => {
                    if self.resource_type.as_deref().map_or(true, |t| t == p.resource_type) {
                        out.push(p);
                    }
                }
                Ok(None) => debug!(path = %path, "indexed path has no record"),
                Err(e) => return self.fail(e),
            }
        }
        if out.is_empty() {
            self.done = true;
            None
        } else {
            Some(Ok(out))
        }
    }
}

impl Rbac {
    /// Every record of a resource type.
    pub fn get_resource_permissions_by_resource_type(&self, resource_type: &str) -> Result<PermissionBatches<'_>> {
        if resource_type.is_empty() {
            return Err(Error::Validation("no resource type given".into()));
        }
        let paths = self.resource_type_paths(resource_type)?;
        Ok(PermissionBatches::new(self, paths, None))
    }

    /// Every record a subject appears in, optionally of one resource type.
    pub fn get_resource_permissions_by_subject(
        &self,
        subject: &str,
        kind: SubjectType,
        resource_type: Option<&str>,
    ) -> Result<PermissionBatches<'_>> {
        let id = self.resolve_or_qualify(kind, subject)?;
        let paths = self.subject_paths(kind, &id)?;
        let filter = resource_type.filter(|t| !t.is_empty()).map(str::to_string);
        Ok(PermissionBatches::new(self, paths, filter))
    }
}
