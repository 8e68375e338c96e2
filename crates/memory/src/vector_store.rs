//! File-backed vector store: append-only JSON-lines records.
//!
//! Each line holds one ingested document:
//! `{"id": "<version>_<index>", "content": "...", "vector_b64": "..."}`
//! where `vector_b64` is the little-endian f64 pseudo-embedding, base64
//! encoded.
//!
//! Storage location: `memory/<component>[/tenant_<id>]/vector_store.jsonl`
//!
//! Search scans the whole file and scores every record, so cost grows
//! linearly with the corpus.

use async_trait::async_trait;
use cmp_core::error::MemoryError;
use cmp_core::memory::{DEFAULT_TOP_K, MemoryStore, SearchResult};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::io_error;
use crate::vector::{cosine_similarity, decode_vector, encode_vector, pseudo_embed, select_top_k};
use crate::version::content_version;

/// Default record file name inside the component directory.
pub const VECTOR_FILE: &str = "vector_store.jsonl";

/// On-disk record layout.
#[derive(Debug, Serialize, Deserialize)]
struct VectorLine {
    id: String,
    content: String,
    vector_b64: String,
}

/// A vector store over one JSONL file.
///
/// The file is not created until the first ingest.
pub struct VectorStore {
    path: PathBuf,
    dim: usize,
    model: String,
}

impl VectorStore {
    pub fn new(path: PathBuf, dim: usize, model: impl Into<String>) -> Self {
        let model = model.into();
        debug!(path = %path.display(), dim, model = %model, "Vector store opened");
        Self { path, dim, model }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemoryStore for VectorStore {
    fn name(&self) -> &str {
        "vector"
    }

    async fn ingest_documents(&self, documents: &[String]) -> Result<String, MemoryError> {
        if documents.is_empty() {
            return Err(MemoryError::NothingToIngest);
        }
        let version = content_version(documents, &self.model);

        let mut buf = String::new();
        for (i, doc) in documents.iter().enumerate() {
            let line = VectorLine {
                id: format!("{version}_{i}"),
                content: doc.clone(),
                vector_b64: encode_vector(&pseudo_embed(doc, self.dim)),
            };
            let json = serde_json::to_string(&line)
                .map_err(|e| MemoryError::Encoding(e.to_string()))?;
            buf.push_str(&json);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.flush().await.map_err(|e| io_error(&self.path, e))?;

        debug!(path = %self.path.display(), count = documents.len(), version = %version, "Documents ingested");
        Ok(version)
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, MemoryError> {
        let top_k = if top_k == 0 { DEFAULT_TOP_K } else { top_k };
        let query_vec = pseudo_embed(query, self.dim);

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        let mut scored: Vec<SearchResult> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<VectorLine>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted vector record");
                    None
                }
            })
            .filter_map(|record| {
                let vec = decode_vector(&record.vector_b64)?;
                if vec.len() != query_vec.len() {
                    return None;
                }
                Some(SearchResult {
                    score: cosine_similarity(&query_vec, &vec),
                    id: record.id,
                    content: record.content,
                    metadata: Map::new(),
                })
            })
            .collect();

        select_top_k(&mut scored, top_k, |r| r.score);
        Ok(scored)
    }

    async fn optimize(&self, _memory_version: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
