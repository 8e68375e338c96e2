//! Prompt Engine for the CMP runtime.
//!
//! - [`PromptEngine`]: compile-once template rendering under `prompts/<component>/`
//! - [`optimize_tokens`] / [`validate_format`]: output shaping
//! - [`enforce_guardrails`] / [`validate_capabilities`]: context-driven checks
//! - [`grounding_drift`]: how far a response strays from its memory sources

pub mod engine;
pub mod format;
pub mod guardrails;

pub use engine::PromptEngine;
pub use format::{TRUNCATION_MARKER, optimize_tokens, validate_format};
pub use guardrails::{enforce_guardrails, grounding_drift, validate_capabilities};
