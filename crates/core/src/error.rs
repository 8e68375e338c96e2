//! Error types for the CMP domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! folds them together and classifies every failure into an
//! [`ErrorCategory`] that the HTTP layer maps to a status code.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all CMP operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context resolution ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Prompt errors ---
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    // --- Security gate ---
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    // --- Collaborators ---
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    // --- Request validation ---
    #[error("Invalid request: {0}")]
    Validation(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure taxonomy. Every request-terminating error belongs to
/// exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Authentication,
    Authorization,
    RateLimit,
    PolicyViolation,
    Dependency,
    Render,
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Context(ContextError::NotFound { .. }) => ErrorCategory::NotFound,
            Error::Context(_) => ErrorCategory::Validation,
            Error::Memory(MemoryError::NothingToIngest) => ErrorCategory::Validation,
            Error::Memory(_) => ErrorCategory::Dependency,
            Error::Prompt(PromptError::InvalidPath(_)) => ErrorCategory::Validation,
            Error::Prompt(PromptError::Format { .. }) => ErrorCategory::PolicyViolation,
            Error::Prompt(_) => ErrorCategory::Render,
            Error::Authentication(_) => ErrorCategory::Authentication,
            Error::Authorization(_) => ErrorCategory::Authorization,
            Error::RateLimited { .. } => ErrorCategory::RateLimit,
            Error::Policy(_) => ErrorCategory::PolicyViolation,
            Error::Dependency(_) => ErrorCategory::Dependency,
            Error::Validation(_) | Error::Serialization(_) => ErrorCategory::Validation,
            Error::Config { .. } | Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this failure belongs in the security audit trail.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authentication
                | ErrorCategory::Authorization
                | ErrorCategory::RateLimit
                | ErrorCategory::PolicyViolation
        )
    }
}

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context '{name}' not found")]
    NotFound { name: String },

    #[error("invalid context name '{0}'")]
    InvalidName(String),

    #[error("failed to read context '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("context validation failed for '{path}': {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("maximum extends/include depth ({max_depth}) exceeded at '{path}'")]
    DepthExceeded { path: PathBuf, max_depth: usize },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("no documents to ingest")]
    NothingToIngest,

    #[error("memory store I/O failed at '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("memory record encoding failed: {0}")]
    Encoding(String),

    #[error("unsupported memory provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid memory configuration at '{path}': {reason}")]
    Config { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template not found: {path}")]
    NotFound { path: PathBuf },

    #[error("invalid template path: {0}")]
    InvalidPath(String),

    #[error("failed to parse template '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to render template '{path}': {reason}")]
    Render { path: PathBuf, reason: String },

    #[error("response does not satisfy format '{format}': {reason}")]
    Format { format: String, reason: String },
}

/// Failures talking to a model backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model provider not configured: {0}")]
    NotConfigured(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("model API returned {status_code}: {message}")]
    Api { status_code: u16, message: String },

    #[error("model process failed: {0}")]
    Process(String),

    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("model generation timed out after {after:?}")]
    Timeout { after: Duration },
}

/// A failed generation is an unavailable collaborator: the request fails
/// with a dependency error.
impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotConfigured(_) => Error::Config {
                message: err.to_string(),
            },
            other => Error::Dependency(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("unsupported auth scheme")]
    UnsupportedScheme,

    #[error("empty bearer token")]
    EmptyToken,

    #[error("invalid token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyViolation {
    #[error("prompt injection risk classified {risk}")]
    PromptInjection { risk: String },

    #[error("input contains personally identifiable information")]
    PiiDetected,

    #[error("action '{action}' is not among the context capabilities")]
    CapabilityDenied { action: String },

    #[error("action '{action}' requires out-of-band confirmation")]
    OutOfBandRequired { action: String },

    #[error("response uses {sources} memory source(s) but cites none")]
    MissingCitation { sources: usize },

    #[error("guardrail check failed: {0}")]
    Guardrail(String),
}

impl PolicyViolation {
    /// Output-side violations concern the rendered response rather than the
    /// caller's input.
    pub fn is_output_side(&self) -> bool {
        matches!(
            self,
            PolicyViolation::MissingCitation { .. } | PolicyViolation::Guardrail(_)
        )
    }
}
