//! API-key store and bearer-token authentication.
//!
//! Keys come from two environment sources:
//! - `CMP_API_KEYS`: a JSON array of [`ApiKey`] records carrying token hashes
//! - `CMP_API_TOKENS`: a compact `token@tenant:scope1|scope2` list for local
//!   development; tokens are hashed on load and the plaintext is dropped
//!
//! Lookups go by the lowercase hex SHA-256 of the presented token.

use cmp_core::{AuthError, Principal};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const API_KEYS_ENV: &str = "CMP_API_KEYS";
pub const API_TOKENS_ENV: &str = "CMP_API_TOKENS";

/// One registered API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,

    /// Hex-encoded SHA-256 of the bearer token.
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Requests per minute; 0 means the gateway default.
    #[serde(default)]
    pub rate_limit: u32,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("key_id", &self.key_id)
            .field("hash", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("scopes", &self.scopes)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl ApiKey {
    fn principal(&self) -> Principal {
        Principal {
            key_id: self.key_id.clone(),
            tenant_id: self.tenant_id.clone(),
            scopes: self.scopes.clone(),
            rate_limit: self.rate_limit,
        }
    }
}

/// Lowercase hex SHA-256 of `token`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Registered keys indexed by id and by token hash.
#[derive(Debug, Default, Clone)]
pub struct ApiKeyStore {
    by_id: HashMap<String, ApiKey>,
    by_hash: HashMap<String, ApiKey>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `CMP_API_KEYS` and `CMP_API_TOKENS` as returned by
    /// `lookup`. A malformed `CMP_API_KEYS` value is logged and ignored.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut store = Self::new();

        if let Some(raw) = lookup(API_KEYS_ENV).filter(|v| !v.trim().is_empty()) {
            match serde_json::from_str::<Vec<ApiKey>>(&raw) {
                Ok(keys) => keys.into_iter().for_each(|k| store.add(k)),
                Err(e) => warn!(error = %e, "Ignoring malformed {API_KEYS_ENV}"),
            }
        }

        if let Some(raw) = lookup(API_TOKENS_ENV).filter(|v| !v.trim().is_empty()) {
            store.add_compact_tokens(&raw);
        }

        debug!(keys = store.len(), "API key store loaded");
        store
    }

    /// Build a store from the process environment.
    pub fn from_process_env() -> Self {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Register a key. A later key with the same id or hash replaces the
    /// earlier one in that index.
    pub fn add(&mut self, key: ApiKey) {
        if !key.hash.is_empty() {
            self.by_hash.insert(key.hash.to_lowercase(), key.clone());
        }
        self.by_id.insert(key.key_id.clone(), key);
    }

    /// Parse a comma-separated `token@tenant:scope1|scope2` list.
    ///
    /// Key ids are `env-<n>` where `n` is the 1-based position in the list,
    /// counting blank entries. Tenant and scopes are optional.
    pub fn add_compact_tokens(&mut self, raw: &str) {
        for (i, entry) in raw.split(',').enumerate() {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (token, tenant, scopes) = match entry.split_once('@') {
                Some((token, rest)) => match rest.split_once(':') {
                    Some((tenant, scopes)) => (token, tenant, scopes),
                    None => (token, rest, ""),
                },
                None => (entry, "", ""),
            };

            self.add(ApiKey {
                key_id: format!("env-{}", i + 1),
                hash: hash_token(token),
                tenant_id: tenant.to_string(),
                scopes: split_scopes(scopes),
                rate_limit: 0,
            });
        }
    }

    pub fn get(&self, key_id: &str) -> Option<&ApiKey> {
        self.by_id.get(key_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Resolve an `Authorization` header value to a principal.
    pub fn authenticate(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.unwrap_or_default();
        if header.is_empty() {
            return Err(AuthError::MissingHeader);
        }

        let scheme_ok = header
            .get(..BEARER_PREFIX.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(BEARER_PREFIX));
        if !scheme_ok {
            return Err(AuthError::UnsupportedScheme);
        }

        let token = header[BEARER_PREFIX.len()..].trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        self.by_hash
            .get(&hash_token(token))
            .map(ApiKey::principal)
            .ok_or(AuthError::InvalidToken)
    }
}

const BEARER_PREFIX: &str = "bearer ";

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
