//! Flat subject to role-name bindings

use tracing::warn;

use crate::engine::Rbac;
use crate::error::{Error, Result};
use crate::keys::{Key, ROLE_BINDINGS};
use crate::model::RoleBinding;
use crate::store;

/// Who is asking. Bootstrap callers (initial provisioning) skip gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub bootstrap: bool,
}

impl Caller {
    pub fn new(subject: impl Into<String>) -> Self {
        Caller { subject: subject.into(), bootstrap: false }
    }

    pub fn bootstrap() -> Self {
        Caller { subject: String::new(), bootstrap: true }
    }
}

impl Rbac {
    /// Replace the roles bound to a subject. Admin only.
    pub fn set_role_binding(&self, caller: &Caller, binding: RoleBinding) -> Result<()> {
        if binding.subject.is_empty() {
            return Err(Error::Validation("role binding has no subject".into()));
        }
        self.require_admin(caller)?;
        let mut roles: Vec<String> = Vec::with_capacity(binding.roles.len());
        for r in binding.roles {
            if !r.is_empty() && !roles.contains(&r) {
                roles.push(r);
            }
        }
        let subject = self.qualify(&binding.subject);
        store::save(self.store.as_ref(), &Key::RoleBinding(subject.as_str()), &roles)
    }

    /// Roles bound to `subject`; empty when none. Self or admin only.
    /// Bindings are keyed by the domain-qualified subject.
    pub fn get_role_binding(&self, caller: &Caller, subject: &str) -> Result<RoleBinding> {
        if subject.is_empty() {
            return Err(Error::Validation("no subject given".into()));
        }
        if !caller.bootstrap && !self.same_subject(&caller.subject, subject) && !self.caller_is_admin(caller)? {
            return Err(Error::PermissionDenied(format!("{} cannot read bindings of {subject}", caller.subject)));
        }
        let subject = self.qualify(subject);
        let roles = self.bound_roles(subject.as_str())?;
        Ok(RoleBinding { subject: subject.to_string(), roles })
    }

    /// Every stored binding. Admin only; undecodable entries are skipped.
    pub fn list_role_bindings(&self, caller: &Caller) -> Result<Vec<RoleBinding>> {
        self.require_admin(caller)?;
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(ROLE_BINDINGS)? {
            let Some(bytes) = self.store.get(&key)? else { continue };
            match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(roles) => out.push(RoleBinding { subject: key[ROLE_BINDINGS.len()..].to_string(), roles }),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt role binding"),
            }
        }
        Ok(out)
    }

    /// Bootstrap, the service account, a binding to the admin role, or a
    /// binding to a role whose actions include `/*`.
    pub fn caller_is_admin(&self, caller: &Caller) -> Result<bool> {
        if caller.bootstrap {
            return Ok(true);
        }
        if caller.subject.is_empty() {
            return Ok(false);
        }
        if self.qualify(&caller.subject) == self.config.service_account_id() {
            return Ok(true);
        }
        let roles = self.bound_roles(self.qualify(&caller.subject).as_str())?;
        let admin = self.config.admin_role_id();
        for r in &roles {
            if *r == self.config.admin_role || self.qualify(r) == admin {
                return Ok(true);
            }
            if let Some(role) = self.directory.role(r)? {
                if role.actions.iter().any(|a| a == "/*") {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn require_admin(&self, caller: &Caller) -> Result<()> {
        if self.caller_is_admin(caller)? {
            return Ok(());
        }
        Err(Error::PermissionDenied(format!("{} is not an administrator", caller.subject)))
    }

    fn bound_roles(&self, subject: &str) -> Result<Vec<String>> {
        match store::load::<Vec<String>>(self.store.as_ref(), &Key::RoleBinding(subject)) {
            Ok(r) => Ok(r.unwrap_or_default()),
            Err(Error::Serialization(e)) => {
                warn!(subject, error = %e, "corrupt role binding reads as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn same_subject(&self, a: &str, b: &str) -> bool {
        !a.is_empty() && (a == b || self.qualify(a) == self.qualify(b))
    }
}
