//! Security gateway for the CMP runtime.
//!
//! Provides:
//! - **Authentication**: bearer tokens checked against hashed API keys
//! - **Authorization**: `<resource>:<action>` scopes with tenant isolation
//! - **Rate limiting**: token buckets per key, tenant and client IP
//! - **Input guards**: prompt-injection risk and PII detection
//! - **Policy**: out-of-band actions, PII mode, citation rules
//! - **Audit logging**: structured security event logging
//! - **Encryption**: AES-256-GCM helpers with environment key lookup

pub mod audit;
pub mod auth;
pub mod crypto;
pub mod pii;
pub mod policy;
pub mod prompt_guard;
pub mod rate_limit;
pub mod rbac;

pub use audit::{AuditEvent, AuditLogger, AuditResult, AuditSink, JsonlFileSink, TracingSink};
pub use auth::{ApiKey, ApiKeyStore, hash_token};
pub use crypto::{CryptoError, EnvKeyProvider, KeyProvider, decrypt_gcm, encrypt_gcm};
pub use pii::{PiiDetector, RegexPiiDetector};
pub use policy::{CitationPolicy, PiiMode, Policy};
pub use prompt_guard::{
    HeuristicRiskClassifier, PromptRisk, RiskClassifier, classify_prompt_risk,
    sanitize_user_input,
};
pub use rate_limit::{LimiterKey, RateLimiter, extract_client_ip, retry_after_secs};
pub use rbac::{Action, Resource, check_permission, has_scope};
