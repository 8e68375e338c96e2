//! `cmp memory`: Ingest into and search component memory stores.

use cmp_config::AppConfig;
use cmp_core::{MemoryStore, SearchResult};
use cmp_core::error::MemoryError;
use cmp_memory::{Provider, StoreConfig, open_store};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

async fn open(
    config: &AppConfig,
    component: &str,
    tenant: &str,
) -> Result<Box<dyn MemoryStore>, MemoryError> {
    let provider: Provider = config.memory.provider.parse()?;
    open_store(
        StoreConfig::new(config.project_root.clone(), component)
            .with_provider(provider)
            .with_tenant(tenant)
            .with_embedding(&config.memory.embedding_model, config.memory.embedding_dim),
    )
    .await
}

/// Ingest every file as one document and return the content version.
pub async fn ingest_files(
    config: &AppConfig,
    component: &str,
    tenant: &str,
    files: &[PathBuf],
) -> Result<String, Box<dyn std::error::Error>> {
    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let text = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
        documents.push(text);
    }

    let store = open(config, component, tenant).await?;
    let version = store.ingest_documents(&documents).await?;
    store.close().await?;
    info!(component, tenant, count = documents.len(), version = %version, "Memory ingested");
    Ok(version)
}

pub async fn search_store(
    config: &AppConfig,
    component: &str,
    tenant: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>, MemoryError> {
    let top_k = if top_k == 0 {
        config.memory.default_top_k
    } else {
        top_k
    };
    let store = open(config, component, tenant).await?;
    debug!(store = store.name(), component, top_k, "Searching memory");
    let results = store.search(query, top_k).await;
    store.close().await?;
    results
}

pub async fn ingest(
    root: &Path,
    component: &str,
    tenant: &str,
    files: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(root)?;
    let version = ingest_files(&config, component, tenant, files).await?;
    println!("Ingested {} document(s) into {component} (version {version})", files.len());
    Ok(())
}

pub async fn search(
    root: &Path,
    component: &str,
    tenant: &str,
    query: &str,
    top_k: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(root)?;
    let results = search_store(&config, component, tenant, query, top_k).await?;

    if results.is_empty() {
        println!("No results.");
    }
    for (i, result) in results.iter().enumerate() {
        let preview: String = result.content.chars().take(80).collect();
        println!("  {:>2}. [score: {:.3}] {} {preview}", i + 1, result.score, result.id);
    }
    Ok(())
}
