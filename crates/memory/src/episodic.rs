//! Episodic store: an append-only conversational log, one entry per line.
//!
//! Storage location: `memory/<component>[/tenant_<id>]/episodic/episodes.log`
//!
//! Search is term overlap: the score of a line is the fraction of query
//! terms it contains.
//!
//! With a key, every line is sealed with AES-256-GCM and stored as
//! `enc:<base64(nonce || ciphertext)>`. Plain lines written before
//! encryption was enabled stay readable; sealed lines that fail to open are
//! skipped.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cmp_core::error::MemoryError;
use cmp_core::memory::{DEFAULT_TOP_K, MemoryStore, SearchResult};
use cmp_security::{decrypt_gcm, encrypt_gcm};
use serde_json::Map;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::io_error;
use crate::vector::select_top_k;
use crate::version::content_version;

/// Log location relative to the component directory.
pub const EPISODE_LOG: &str = "episodic/episodes.log";

/// Marker written in front of sealed lines.
pub const ENCRYPTED_PREFIX: &str = "enc:";

/// Model identifier mixed into episodic versions.
const EPISODIC_MODEL: &str = "episodic";

pub type EpisodicKey = [u8; 32];

pub struct EpisodicStore {
    path: PathBuf,
    key: Option<EpisodicKey>,
}

impl EpisodicStore {
    /// Open the log, creating it (and its directory) when missing. Entries
    /// are sealed when `key` is given.
    pub async fn open(path: PathBuf, key: Option<EpisodicKey>) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(path = %path.display(), encrypted = key.is_some(), "Episodic store opened");
        Ok(Self { path, key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_line(&self, entry: &str) -> Result<String, MemoryError> {
        let line = entry.trim().replace(['\r', '\n'], " ");
        let Some(key) = &self.key else {
            return Ok(line);
        };
        let sealed = encrypt_gcm(key, line.as_bytes())
            .map_err(|e| MemoryError::Encoding(e.to_string()))?;
        Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(sealed)))
    }

    /// Plain text of a stored line; `None` when a sealed line cannot be opened.
    fn open_line(&self, raw: &str) -> Option<String> {
        let Some(encoded) = raw.strip_prefix(ENCRYPTED_PREFIX) else {
            return Some(raw.to_string());
        };
        let key = self.key.as_ref()?;
        let sealed = STANDARD.decode(encoded).ok()?;
        let plain = decrypt_gcm(key, &sealed).ok()?;
        String::from_utf8(plain).ok()
    }
}

/// Fraction of whitespace-separated `query` terms found in `text`.
/// Both sides are expected lowercase.
pub fn term_overlap(text: &str, query: &str) -> f64 {
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let present = terms.iter().filter(|t| text.contains(**t)).count();
    present as f64 / terms.len() as f64
}

#[async_trait]
impl MemoryStore for EpisodicStore {
    fn name(&self) -> &str {
        "episodic"
    }

    async fn ingest_documents(&self, documents: &[String]) -> Result<String, MemoryError> {
        if documents.is_empty() {
            return Err(MemoryError::NothingToIngest);
        }

        let mut buf = String::new();
        for doc in documents {
            buf.push_str(&self.to_line(doc)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.flush().await.map_err(|e| io_error(&self.path, e))?;

        Ok(content_version(documents, EPISODIC_MODEL))
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, MemoryError> {
        let top_k = if top_k == 0 { DEFAULT_TOP_K } else { top_k };
        let query = query.trim().to_lowercase();

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        let mut results: Vec<SearchResult> = content
            .lines()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let Some(line) = self.open_line(raw) else {
                    warn!(line = idx, "Skipping unreadable episodic entry");
                    return None;
                };
                let score = term_overlap(&line.to_lowercase(), &query);
                (score > 0.0).then(|| SearchResult {
                    id: idx.to_string(),
                    content: line,
                    score,
                    metadata: Map::new(),
                })
            })
            .collect();

        select_top_k(&mut results, top_k, |r| r.score);
        Ok(results)
    }

    async fn optimize(&self, _memory_version: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries() -> Vec<String> {
        vec![
            "User asked about refund policy".into(),
            "Follow-up: order 12345".into(),
            "Resolved: provided RMA".into(),
        ]
    }

    #[tokio::test]
    async fn ingest_and_search() {
        let dir = TempDir::new().unwrap();
        let store = EpisodicStore::open(dir.path().join(EPISODE_LOG), None).await.unwrap();
        store.ingest_documents(&entries()).await.unwrap();

        let results = store.search("refund policy", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "0");
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn partial_matches_rank_lower() {
        let dir = TempDir::new().unwrap();
        let store = EpisodicStore::open(dir.path().join(EPISODE_LOG), None).await.unwrap();
        store.ingest_documents(&entries()).await.unwrap();

        let results = store.search("Order refund", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| (r.score - 0.5).abs() < 1e-9));
    }

    #[tokio::test]
    async fn open_creates_empty_log() {
        let dir = TempDir::new().unwrap();
        let store = EpisodicStore::open(dir.path().join(EPISODE_LOG), None).await.unwrap();
        assert!(store.path().exists());
        assert!(store.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn encrypted_entries_are_sealed_on_disk() {
        let dir = TempDir::new().unwrap();
        let key = [7u8; 32];
        let store = EpisodicStore::open(dir.path().join(EPISODE_LOG), Some(key))
            .await
            .unwrap();
        store.ingest_documents(&entries()).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().all(|l| l.starts_with(ENCRYPTED_PREFIX)));
        assert!(!content.contains("refund"));

        let results = store.search("refund policy", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "User asked about refund policy");
    }

    #[tokio::test]
    async fn wrong_key_hides_sealed_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(EPISODE_LOG);
        let sealed = EpisodicStore::open(path.clone(), Some([1u8; 32])).await.unwrap();
        sealed.ingest_documents(&["refund issued".to_string()]).await.unwrap();

        let plain = EpisodicStore::open(path.clone(), None).await.unwrap();
        plain.ingest_documents(&["refund requested".to_string()]).await.unwrap();

        let other = EpisodicStore::open(path, Some([2u8; 32])).await.unwrap();
        let results = other.search("refund", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "refund requested");
    }

    #[tokio::test]
    async fn version_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = EpisodicStore::open(dir.path().join(EPISODE_LOG), None).await.unwrap();
        let a = store.ingest_documents(&entries()).await.unwrap();
        let b = store.ingest_documents(&entries()).await.unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            store.ingest_documents(&[]).await,
            Err(MemoryError::NothingToIngest)
        ));
    }

    #[test]
    fn overlap_scoring() {
        assert_eq!(term_overlap("refund policy", "refund"), 1.0);
        assert_eq!(term_overlap("refund policy", "refund shipping"), 0.5);
        assert_eq!(term_overlap("refund policy", ""), 0.0);
    }
}
