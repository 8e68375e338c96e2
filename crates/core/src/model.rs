//! Model provider trait: the abstraction over text-generation backends.
//!
//! A provider takes the rendered prompt and returns generated text.
//! Implementations: HTTP inference endpoints and a local subprocess.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Sampling parameters forwarded to the backend. Zero means "backend default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub top_p: f64,
    #[serde(default)]
    pub max_new_tokens: u32,
    #[serde(default)]
    pub repetition_penalty: f64,
}

/// The core Provider trait for text generation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Generate a completion for `input`.
    async fn generate(&self, input: &str, params: &GenerationParams)
    -> Result<String, ModelError>;
}
