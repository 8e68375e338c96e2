//! Memory stores for the CMP runtime.
//!
//! Three interchangeable [`MemoryStore`](cmp_core::MemoryStore) backends:
//! - [`VectorStore`]: append-only JSONL of pseudo-embedded documents
//! - [`EpisodicStore`]: append-only line log searched by term overlap,
//!   optionally sealed with AES-256-GCM
//! - [`InMemoryStore`]: process-local index, same ranking as the vector store
//!
//! [`open_store`] picks one from a [`StoreConfig`] and the component's
//! `memory_config.yaml`.

pub mod config;
pub mod episodic;
pub mod in_memory;
pub mod vector;
pub mod vector_store;
pub mod version;

pub use config::{Provider, StoreConfig, derive_path, open_store};
pub use episodic::{EpisodicKey, EpisodicStore};
pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, pseudo_embed, select_top_k};
pub use vector_store::VectorStore;
pub use version::content_version;

use cmp_core::error::MemoryError;
use std::path::Path;

pub(crate) fn io_error(path: &Path, err: std::io::Error) -> MemoryError {
    MemoryError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
