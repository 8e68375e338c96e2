//! # CMP Core
//!
//! Domain types, traits, and error definitions for the CMP agent-serving
//! runtime. Other crates depend inward on this one; it pulls in no web,
//! runtime or storage crates.
//!
//! The pluggable seams live here as traits: [`MemoryStore`] for memory
//! backends and [`ModelProvider`] for generation backends. Context content
//! hashing (`sha2` + `hex`) lives in [`context`] so every caller derives
//! the same identifier; `serde_json` supplies the canonical form it hashes.

pub mod error;
pub mod context;
pub mod memory;
pub mod model;
pub mod principal;
pub mod paths;

// Re-export key types at crate root for ergonomics
pub use error::{
    AuthError, ContextError, Error, ErrorCategory, MemoryError, ModelError, PolicyViolation,
    PromptError, Result,
};
pub use context::{Context, Guardrails, MemoryPolicy, Role, TestingConfig, Tool};
pub use memory::{MemoryRecord, MemoryStore, SearchResult};
pub use model::{GenerationParams, ModelProvider};
pub use principal::Principal;
