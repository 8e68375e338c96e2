//! Memory trait: pluggable knowledge storage with top-k search.
//!
//! The memory system lets a component retrieve stored knowledge relevant to
//! a query. Every backend exposes the same four operations:
//! - `ingest_documents` (append, returning a content-addressed version)
//! - `search` (top-k by descending score)
//! - `optimize` (maintenance hook)
//! - `close`
//!
//! Storage is scoped by `(component, tenant)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MemoryError;

/// A single stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// `<version>_<index>` for vector records, line index for episodic ones.
    pub id: String,

    pub content: String,

    /// Normalized embedding; absent for raw-text records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A ranked match produced for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub score: f64,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Number of results returned when a caller passes `top_k == 0`.
pub const DEFAULT_TOP_K: usize = 5;

/// The core storage-engine trait.
///
/// Implementations: vector JSONL file, episodic log, in-memory index.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "vector", "episodic", "in_memory").
    fn name(&self) -> &str;

    /// Append documents and return the content-addressed version identifier.
    async fn ingest_documents(&self, documents: &[String]) -> Result<String, MemoryError>;

    /// Return at most `top_k` results ordered by non-increasing score.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, MemoryError>;

    /// Maintenance / compaction for a given memory version.
    async fn optimize(&self, memory_version: &str) -> Result<(), MemoryError>;

    /// Release any held resources.
    async fn close(&self) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_omits_empty_metadata() {
        let result = SearchResult {
            id: "abc_0".into(),
            content: "Returns are accepted within 30 days.".into(),
            score: 0.91,
            metadata: Map::new(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("Returns are accepted"));
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn record_without_embedding_roundtrips() {
        let json = r#"{"id":"3","content":"user asked about shipping"}"#;
        let record: MemoryRecord = serde_json::from_str(json).unwrap();
        assert!(record.embedding.is_none());
        assert_eq!(record.id, "3");
    }
}
