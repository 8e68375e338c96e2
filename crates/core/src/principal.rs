//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

/// Key id used when authentication is disabled.
pub const ANONYMOUS_KEY_ID: &str = "anonymous";

/// An authenticated caller, derived from an API key lookup. Lives only in
/// process memory for the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub key_id: String,

    /// Empty when the key is not bound to a tenant.
    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Requests per minute override for this key; 0 uses the gateway default.
    #[serde(default)]
    pub rate_limit: u32,
}

impl Principal {
    /// The caller used when no API keys are configured.
    pub fn anonymous() -> Self {
        Self {
            key_id: ANONYMOUS_KEY_ID.into(),
            tenant_id: String::new(),
            scopes: Vec::new(),
            rate_limit: 0,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.key_id == ANONYMOUS_KEY_ID
    }
}
