//! Scope-based authorization with tenant isolation.
//!
//! Scopes take the form `<resource>:<action>` (`chat:execute`,
//! `context:read`, `memory:write`). `admin:*` grants everything and a bare
//! `*` matches any single scope check.

use cmp_core::Principal;
use serde::{Deserialize, Serialize};

/// Scope that satisfies every permission check.
pub const ADMIN_SCOPE: &str = "admin:*";

/// A protected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// `chat`, `context`, `memory`, `prompt`, `metrics`, ...
    pub kind: String,
    pub name: String,
    /// Owning tenant; empty for shared resources.
    pub tenant: String,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            tenant: tenant.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Execute,
    Admin,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Execute => "execute",
            Action::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the principal holds `scope` exactly, or the `*` wildcard.
pub fn has_scope(principal: &Principal, scope: &str) -> bool {
    principal.scopes.iter().any(|s| s == scope || s == "*")
}

/// Allow `action` on `resource` when tenants agree and the principal holds
/// `<kind>:<action>` or [`ADMIN_SCOPE`].
///
/// Tenants only have to agree when both sides name one; comparison ignores
/// ASCII case.
pub fn check_permission(principal: &Principal, resource: &Resource, action: Action) -> bool {
    if !principal.tenant_id.is_empty()
        && !resource.tenant.is_empty()
        && !principal.tenant_id.eq_ignore_ascii_case(&resource.tenant)
    {
        return false;
    }

    let needed = format!("{}:{}", resource.kind, action);
    has_scope(principal, &needed) || has_scope(principal, ADMIN_SCOPE)
}
