//! In-memory backend: useful for testing and ephemeral sessions.
//!
//! Same pseudo-embedding and ranking as the vector store, without the file.

use async_trait::async_trait;
use cmp_core::error::MemoryError;
use cmp_core::memory::{DEFAULT_TOP_K, MemoryRecord, MemoryStore, SearchResult};
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::{cosine_similarity, pseudo_embed, select_top_k};
use crate::version::content_version;

/// An in-memory store that keeps embedded records in a Vec.
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
    dim: usize,
    model: String,
}

impl InMemoryStore {
    pub fn new(dim: usize, model: impl Into<String>) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            dim,
            model: model.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn ingest_documents(&self, documents: &[String]) -> Result<String, MemoryError> {
        if documents.is_empty() {
            return Err(MemoryError::NothingToIngest);
        }
        let version = content_version(documents, &self.model);

        let mut records = self.records.write().await;
        records.extend(documents.iter().enumerate().map(|(i, doc)| MemoryRecord {
            id: format!("{version}_{i}"),
            content: doc.clone(),
            embedding: Some(pseudo_embed(doc, self.dim)),
            metadata: Map::new(),
        }));
        Ok(version)
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, MemoryError> {
        let top_k = if top_k == 0 { DEFAULT_TOP_K } else { top_k };
        let query_vec = pseudo_embed(query, self.dim);

        let records = self.records.read().await;
        let mut results: Vec<SearchResult> = records
            .iter()
            .filter_map(|record| {
                let embedding = record.embedding.as_ref()?;
                Some(SearchResult {
                    id: record.id.clone(),
                    content: record.content.clone(),
                    score: cosine_similarity(&query_vec, embedding),
                    metadata: record.metadata.clone(),
                })
            })
            .collect();

        select_top_k(&mut results, top_k, |r| r.score);
        Ok(results)
    }

    /// Drop repeated copies of `memory_version`'s records, keeping the first
    /// of each id.
    async fn optimize(&self, memory_version: &str) -> Result<(), MemoryError> {
        let prefix = format!("{memory_version}_");
        let mut records = self.records.write().await;
        let mut seen = std::collections::HashSet::new();
        records.retain(|r| !r.id.starts_with(&prefix) || seen.insert(r.id.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
