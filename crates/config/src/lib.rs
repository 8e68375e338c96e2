//! Configuration loading, validation, and management for the CMP runtime.
//!
//! Loads configuration from `<project_root>/cmp.toml` with `CMP_*`
//! environment variable overrides. Validates all settings at startup.
//!
//! Environment lookups go through an injectable function so tests can
//! supply variables without touching the process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the project configuration, relative to the project root.
pub const CONFIG_FILE: &str = "cmp.toml";

/// The root configuration structure.
///
/// Maps directly to `<project_root>/cmp.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `contexts/`, `memory/` and `prompts/`.
    #[serde(skip)]
    pub project_root: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub prompts: PromptConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// `vector`, `episodic` or `in_memory`. Components may override this in
    /// their own `memory_config.yaml`.
    #[serde(default = "default_memory_provider")]
    pub provider: String,

    /// Identifier mixed into every memory version hash.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Used when a request does not specify `top_k`.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

fn default_memory_provider() -> String {
    "vector".into()
}
fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".into()
}
fn default_embedding_dim() -> usize {
    384
}
fn default_top_k() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: default_memory_provider(),
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            default_top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reject requests whose prompt-injection risk is high.
    #[serde(default)]
    pub pi_enforcement: bool,

    /// Require a citation marker whenever memory results were used.
    #[serde(default)]
    pub require_citation: bool,

    /// Case-insensitive substrings accepted as a citation.
    #[serde(default = "default_citation_markers")]
    pub citation_markers: Vec<String>,

    /// JSON-lines audit log, relative to the project root when not absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_citation_markers() -> Vec<String> {
    vec!["source:".into(), "sources:".into(), "[source".into()]
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pi_enforcement: false,
            require_citation: false,
            citation_markers: default_citation_markers(),
            audit_log: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Default token bucket applied to keys without their own limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Prompt files a chat request may select. Anything else is rejected.
    #[serde(default = "default_allowed_prompts")]
    pub allowed_files: Vec<String>,

    /// Used when a request omits `prompt_file`.
    #[serde(default = "default_prompt_file")]
    pub default_file: String,
}

fn default_allowed_prompts() -> Vec<String> {
    vec!["agent_response.md".into(), "search_response.md".into()]
}
fn default_prompt_file() -> String {
    "agent_response.md".into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            allowed_files: default_allowed_prompts(),
            default_file: default_prompt_file(),
        }
    }
}

/// Optional generation step run on the rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `none` (return the rendered prompt), `auto` (HTTP when `HF_TOKEN` and
    /// a model id are present), `http` or `local`.
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// Base URL of the HTTP inference API; the model id is appended.
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub model_id: String,

    /// Interpreter for the local provider.
    #[serde(default = "default_local_program")]
    pub program: String,

    /// Script run by `program`, relative to the project root when not absolute.
    #[serde(default = "default_local_script")]
    pub script: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// The local process is killed once this elapses.
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default)]
    pub top_p: f64,
}

fn default_model_provider() -> String {
    "none".into()
}
fn default_model_endpoint() -> String {
    "https://api-inference.huggingface.co/models".into()
}
fn default_local_program() -> String {
    "python3".into()
}
fn default_local_script() -> String {
    "providers/local_provider.py".into()
}
fn default_http_timeout() -> u64 {
    60
}
fn default_local_timeout() -> u64 {
    600
}
fn default_max_new_tokens() -> u32 {
    256
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            endpoint: default_model_endpoint(),
            model_id: String::new(),
            program: default_local_program(),
            script: default_local_script(),
            http_timeout_secs: default_http_timeout(),
            local_timeout_secs: default_local_timeout(),
            max_new_tokens: default_max_new_tokens(),
            temperature: 0.0,
            top_p: 0.0,
        }
    }
}

impl AppConfig {
    /// Load `<project_root>/cmp.toml` and apply process environment overrides.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&project_root.join(CONFIG_FILE))?;
        config.project_root = project_root.to_path_buf();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (no environment overlay).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let project_root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::with_root(project_root));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.project_root = project_root;

        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `project_root`.
    pub fn with_root(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Apply `CMP_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CMP_PI_ENFORCEMENT") {
            self.security.pi_enforcement = parse_bool(&v);
        }
        if let Some(v) = lookup("CMP_REQUIRE_CITATION") {
            self.security.require_citation = parse_bool(&v);
        }
        if let Some(v) = lookup("CMP_CITATION_MARKERS") {
            let markers: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
            if !markers.is_empty() {
                self.security.citation_markers = markers;
            }
        }
        if let Some(v) = lookup("CMP_AUDIT_LOG")
            && !v.trim().is_empty()
        {
            self.security.audit_log = Some(v.trim().to_string());
        }
        if let Some(v) = lookup("CMP_HOST")
            && !v.trim().is_empty()
        {
            self.server.host = v.trim().to_string();
        }
        if let Some(v) = lookup("CMP_PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable CMP_PORT"),
            }
        }
        if let Some(v) = lookup("CMP_MEMORY_PROVIDER")
            && !v.trim().is_empty()
        {
            self.memory.provider = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("CMP_EMBEDDING_MODEL")
            && !v.trim().is_empty()
        {
            self.memory.embedding_model = v.trim().to_string();
        }
        if let Some(v) = lookup("CMP_MODEL_PROVIDER")
            && !v.trim().is_empty()
        {
            self.model.provider = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("HF_MODEL_ID")
            && !v.trim().is_empty()
        {
            self.model.model_id = v.trim().to_string();
        }
        if let Some(v) = lookup("HF_ENDPOINT")
            && !v.trim().is_empty()
        {
            self.model.endpoint = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("CMP_PYTHON_BIN")
            && !v.trim().is_empty()
        {
            self.model.program = v.trim().to_string();
        }
        if let Some(v) = lookup("CMP_PYTHON_SCRIPT")
            && !v.trim().is_empty()
        {
            self.model.script = v.trim().to_string();
        }
        if let Some(v) = lookup("CMP_LOCAL_TIMEOUT_SECONDS") {
            match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.model.local_timeout_secs = secs,
                _ => tracing::warn!(value = %v, "Ignoring invalid CMP_LOCAL_TIMEOUT_SECONDS"),
            }
        }
    }

    /// Resolved local model script path.
    pub fn model_script_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.model.script);
        if path.is_absolute() {
            path
        } else {
            self.project_root.join(path)
        }
    }

    /// Resolved audit log path, if auditing to a file is configured.
    pub fn audit_log_path(&self) -> Option<PathBuf> {
        self.security.audit_log.as_ref().map(|p| {
            let path = PathBuf::from(p);
            if path.is_absolute() {
                path
            } else {
                self.project_root.join(path)
            }
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".into(),
            ));
        }

        if self.prompts.allowed_files.is_empty() {
            return Err(ConfigError::ValidationError(
                "prompts.allowed_files must list at least one prompt file".into(),
            ));
        }

        if !self.prompts.allowed_files.contains(&self.prompts.default_file) {
            return Err(ConfigError::ValidationError(format!(
                "prompts.default_file '{}' is not in prompts.allowed_files",
                self.prompts.default_file
            )));
        }

        if self.security.rate_limit.requests_per_second <= 0.0 || self.security.rate_limit.burst == 0 {
            return Err(ConfigError::ValidationError(
                "security.rate_limit requires a positive rate and burst".into(),
            ));
        }

        if !matches!(
            self.model.provider.as_str(),
            "none" | "auto" | "http" | "local"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "model.provider '{}' must be one of none, auto, http, local",
                self.model.provider
            )));
        }

        if self.model.http_timeout_secs == 0 || self.model.local_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "model timeouts must be > 0".into(),
            ));
        }

        if self.memory.embedding_dim == 0 {
            return Err(ConfigError::ValidationError(
                "memory.embedding_dim must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            server: ServerConfig::default(),
            memory: MemoryConfig::default(),
            security: SecurityConfig::default(),
            prompts: PromptConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

/// Interpret an environment flag. Accepts `true`, `1`, `yes`, `on`.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
