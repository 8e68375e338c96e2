//! Context model: the declarative specification of an agent.
//!
//! A Context bundles the agent's role, the tools it may reference, output
//! guardrails, memory policy and drift-testing parameters. Contexts are
//! authored as YAML `.ctx` files and resolved per tenant.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A resolved, validated agent Context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,

    /// Semantic version string as authored.
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub role: Role,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    #[serde(default)]
    pub guardrails: Guardrails,

    #[serde(default)]
    pub memory: MemoryPolicy,

    #[serde(default)]
    pub testing: TestingConfig,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The agent's persona and what it may or may not do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub persona: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub limitations: Vec<String>,
}

/// An external function or integration the agent may reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Tool {
    /// Identity used when tool lists are unioned: name, else uri.
    pub fn identity_key(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            &self.uri
        }
    }
}

/// Post-render constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guardrails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tone: String,

    /// Expected output format: `json`, `markdown`, `text` or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Whitespace-token ceiling for the response. Non-positive disables trimming.
    #[serde(default)]
    pub max_tokens: i64,

    #[serde(default)]
    pub temperature: f64,
}

/// How conversational memory is retained for this agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    #[serde(default)]
    pub episodic: bool,

    #[serde(default)]
    pub max_history: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub privacy: String,
}

/// Drift-testing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    #[serde(default)]
    pub business_rules: Vec<String>,
}

fn default_drift_threshold() -> f64 {
    0.85
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            drift_threshold: default_drift_threshold(),
            business_rules: Vec::new(),
        }
    }
}

impl Context {
    /// Create a minimal context with the required fields set.
    pub fn new(name: impl Into<String>, version: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            role: Role {
                persona: persona.into(),
                ..Role::default()
            },
            tools: Vec::new(),
            guardrails: Guardrails::default(),
            memory: MemoryPolicy::default(),
            testing: TestingConfig::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Semantic validation: name, version and persona must be non-empty.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("context name is required");
        }
        if self.version.trim().is_empty() {
            return Err("context version is required");
        }
        if self.role.persona.trim().is_empty() {
            return Err("role persona is required");
        }
        Ok(())
    }

    /// Content-addressed identifier: `sha256:<hex>` over the canonical JSON form.
    pub fn content_sha(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(format!("sha256:{}", hex::encode(digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_persona() {
        let mut ctx = Context::new("SupportBot", "1.0.0", "helpful agent");
        assert!(ctx.validate().is_ok());

        ctx.role.persona = "  ".into();
        assert_eq!(ctx.validate(), Err("role persona is required"));
    }

    #[test]
    fn validate_requires_version() {
        let ctx = Context::new("SupportBot", "", "agent");
        assert_eq!(ctx.validate(), Err("context version is required"));
    }

    #[test]
    fn missing_sections_take_defaults() {
        let json = r#"{"name":"a","version":"1","role":{"persona":"p"}}"#;
        let ctx: Context = serde_json::from_str(json).unwrap();
        assert!(ctx.tools.is_empty());
        assert_eq!(ctx.testing.drift_threshold, 0.85);
        assert_eq!(ctx.guardrails.max_tokens, 0);
    }

    #[test]
    fn content_sha_is_stable_and_content_sensitive() {
        let a = Context::new("a", "1.0.0", "p");
        let b = Context::new("a", "1.0.0", "p");
        let c = Context::new("a", "1.0.1", "p");

        let sha_a = a.content_sha().unwrap();
        assert!(sha_a.starts_with("sha256:"));
        assert_eq!(sha_a.len(), "sha256:".len() + 64);
        assert_eq!(sha_a, b.content_sha().unwrap());
        assert_ne!(sha_a, c.content_sha().unwrap());
    }

    #[test]
    fn tool_identity_prefers_name() {
        let named = Tool {
            name: "search".into(),
            uri: "mcp://search".into(),
            description: String::new(),
        };
        let anonymous = Tool {
            name: String::new(),
            uri: "mcp://db".into(),
            description: String::new(),
        };
        assert_eq!(named.identity_key(), "search");
        assert_eq!(anonymous.identity_key(), "mcp://db");
    }
}
