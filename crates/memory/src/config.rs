//! Store configuration and the provider factory.
//!
//! A component may carry `memory/<component>/memory_config.yaml`:
//!
//! ```yaml
//! vector_store:
//!   type: vector
//!   path: vectors.jsonl
//! embedding_model:
//!   name: bge-small-en
//!   dimensions: 384
//! episodic:
//!   enabled: false
//!   encryption: false
//! ```
//!
//! Values found there override the caller's [`StoreConfig`].

use cmp_core::error::MemoryError;
use cmp_core::memory::MemoryStore;
use cmp_core::paths::sanitize_segment;
use serde::Deserialize;
use cmp_security::{EnvKeyProvider, KeyProvider};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::episodic::{EPISODE_LOG, EpisodicStore};
use crate::in_memory::InMemoryStore;
use crate::io_error;
use crate::vector_store::{VECTOR_FILE, VectorStore};

/// Per-component override file.
pub const COMPONENT_CONFIG_FILE: &str = "memory_config.yaml";

pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// JSONL vector store. `sqlite` is accepted as an alias.
    Vector,
    Episodic,
    InMemory,
}

impl FromStr for Provider {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vector" | "sqlite" => Ok(Self::Vector),
            "episodic" => Ok(Self::Episodic),
            "in_memory" | "memory" => Ok(Self::InMemory),
            other => Err(MemoryError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vector => "vector",
            Self::Episodic => "episodic",
            Self::InMemory => "in_memory",
        })
    }
}

/// Everything needed to open a store for one `(component, tenant)`.
#[derive(Clone)]
pub struct StoreConfig {
    pub provider: Provider,
    pub root_dir: PathBuf,
    pub component: String,
    /// Empty for the shared, tenant-less store.
    pub tenant_id: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub episodic_encryption: bool,
    /// Source of the episodic key; `CMP_EPISODIC_KEY` from the process
    /// environment when unset.
    pub keys: Option<Arc<dyn KeyProvider>>,
    /// Record file name for the vector store, inside the component directory.
    pub vector_file: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("provider", &self.provider)
            .field("root_dir", &self.root_dir)
            .field("component", &self.component)
            .field("tenant_id", &self.tenant_id)
            .field("episodic_encryption", &self.episodic_encryption)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    pub fn new(root_dir: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self {
            provider: Provider::Vector,
            root_dir: root_dir.into(),
            component: component.into(),
            tenant_id: String::new(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            episodic_encryption: false,
            keys: None,
            vector_file: VECTOR_FILE.into(),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_embedding(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.embedding_model = model.into();
        self.embedding_dim = dim;
        self
    }

    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// `memory/<component>/memory_config.yaml`
    pub fn component_config_path(&self) -> PathBuf {
        self.root_dir
            .join("memory")
            .join(sanitize_segment(&self.component))
            .join(COMPONENT_CONFIG_FILE)
    }

    /// Tenant-aware path of `subpath` under this component's memory directory.
    pub fn store_path(&self, subpath: &str) -> PathBuf {
        derive_path(&self.root_dir, &self.component, &self.tenant_id, subpath)
    }
}

/// `<root>/memory/<component>[/tenant_<id>]/<subpath>`
pub fn derive_path(root: &Path, component: &str, tenant_id: &str, subpath: &str) -> PathBuf {
    let mut base = root.join("memory").join(sanitize_segment(component));
    if !tenant_id.is_empty() {
        base = base.join(format!("tenant_{}", sanitize_segment(tenant_id)));
    }
    base.join(subpath)
}

// ── memory_config.yaml ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ComponentMemoryConfig {
    #[serde(default)]
    pub vector_store: Option<VectorStoreSection>,
    #[serde(default)]
    pub embedding_model: Option<EmbeddingSection>,
    #[serde(default)]
    pub episodic: Option<EpisodicSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VectorStoreSection {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EpisodicSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub encryption: Option<bool>,
}

impl ComponentMemoryConfig {
    /// Fold these settings into `config`. `episodic.enabled` takes precedence
    /// over `vector_store.type`.
    pub fn apply(self, config: &mut StoreConfig) -> Result<(), MemoryError> {
        if let Some(vs) = self.vector_store {
            if let Some(kind) = vs.kind {
                config.provider = kind.parse()?;
            }
            if let Some(path) = vs.path.filter(|p| !p.trim().is_empty()) {
                config.vector_file = sanitize_segment(path.trim());
            }
        }
        if let Some(em) = self.embedding_model {
            if let Some(name) = em.name {
                config.embedding_model = name;
            }
            if let Some(dim) = em.dimensions.filter(|d| *d > 0) {
                config.embedding_dim = dim;
            }
        }
        if let Some(ep) = self.episodic {
            if ep.enabled == Some(true) {
                config.provider = Provider::Episodic;
            }
            if let Some(encrypt) = ep.encryption {
                config.episodic_encryption = encrypt;
            }
        }
        Ok(())
    }
}

/// Read the component override file into `config`. A missing file is fine.
pub async fn load_component_config(config: &mut StoreConfig) -> Result<(), MemoryError> {
    let path = config.component_config_path();
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(&path, e)),
    };

    let parsed: ComponentMemoryConfig =
        serde_yaml::from_str(&raw).map_err(|e| MemoryError::Config {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    debug!(path = %path.display(), "Applying component memory config");
    parsed.apply(config)
}

/// Open the store described by `config`, after applying the component's
/// `memory_config.yaml`.
pub async fn open_store(mut config: StoreConfig) -> Result<Box<dyn MemoryStore>, MemoryError> {
    load_component_config(&mut config).await?;

    info!(
        provider = %config.provider,
        component = %config.component,
        tenant = %config.tenant_id,
        "Opening memory store"
    );

    match config.provider {
        Provider::Vector => Ok(Box::new(VectorStore::new(
            config.store_path(&config.vector_file),
            config.embedding_dim,
            config.embedding_model,
        ))),
        Provider::Episodic => {
            let path = config.store_path(EPISODE_LOG);
            let key = if config.episodic_encryption {
                let keys = config
                    .keys
                    .clone()
                    .unwrap_or_else(|| Arc::new(EnvKeyProvider::default()) as Arc<dyn KeyProvider>);
                let key = keys
                    .key(&config.tenant_id)
                    .map_err(|e| MemoryError::Config {
                        path: path.clone(),
                        reason: format!("episodic encryption: {e}"),
                    })?;
                Some(key)
            } else {
                None
            };
            Ok(Box::new(EpisodicStore::open(path, key).await?))
        }
        Provider::InMemory => Ok(Box::new(InMemoryStore::new(
            config.embedding_dim,
            config.embedding_model,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn provider_parsing() {
        assert_eq!("sqlite".parse::<Provider>().unwrap(), Provider::Vector);
        assert_eq!("Episodic".parse::<Provider>().unwrap(), Provider::Episodic);
        assert_eq!("in_memory".parse::<Provider>().unwrap(), Provider::InMemory);
        assert!(matches!(
            "redis".parse::<Provider>(),
            Err(MemoryError::UnsupportedProvider(p)) if p == "redis"
        ));
    }

    #[test]
    fn paths_are_tenant_scoped_and_sanitised() {
        let root = Path::new("/p");
        assert_eq!(
            derive_path(root, "CustomerDocs", "", VECTOR_FILE),
            PathBuf::from("/p/memory/CustomerDocs/vector_store.jsonl")
        );
        assert_eq!(
            derive_path(root, "SupportBot", "acme", EPISODE_LOG),
            PathBuf::from("/p/memory/SupportBot/tenant_acme/episodic/episodes.log")
        );
        assert_eq!(
            derive_path(root, "Docs", "../x", VECTOR_FILE),
            PathBuf::from("/p/memory/Docs/tenant__x/vector_store.jsonl")
        );
    }

    #[tokio::test]
    async fn component_config_switches_to_episodic() {
        let dir = TempDir::new().unwrap();
        let component_dir = dir.path().join("memory").join("SupportBot");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(
            component_dir.join(COMPONENT_CONFIG_FILE),
            "embedding_model:\n  name: bge-small-en\n  dimensions: 128\nepisodic:\n  enabled: true\n  encryption: true\n",
        )
        .unwrap();

        let mut config = StoreConfig::new(dir.path(), "SupportBot");
        load_component_config(&mut config).await.unwrap();
        assert_eq!(config.provider, Provider::Episodic);
        assert!(config.episodic_encryption);
        assert_eq!(config.embedding_model, "bge-small-en");
        assert_eq!(config.embedding_dim, 128);

        let missing_key = Arc::new(EnvKeyProvider::with_lookup(|_| None));
        let err = open_store(
            StoreConfig::new(dir.path(), "SupportBot").with_key_provider(missing_key),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, MemoryError::Config { .. }));

        let keys = Arc::new(EnvKeyProvider::with_lookup(|_| Some("episodic-secret".into())));
        let store = open_store(
            StoreConfig::new(dir.path(), "SupportBot")
                .with_tenant("acme")
                .with_key_provider(keys),
        )
        .await
        .unwrap();
        assert_eq!(store.name(), "episodic");
        store.ingest_documents(&["refund issued".to_string()]).await.unwrap();
        assert_eq!(store.search("refund", 1).await.unwrap()[0].content, "refund issued");
        assert!(dir
            .path()
            .join("memory/SupportBot/tenant_acme/episodic/episodes.log")
            .exists());
    }

    #[tokio::test]
    async fn malformed_component_config_is_error() {
        let dir = TempDir::new().unwrap();
        let component_dir = dir.path().join("memory").join("Docs");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(component_dir.join(COMPONENT_CONFIG_FILE), "episodic: [unclosed").unwrap();

        let err = open_store(StoreConfig::new(dir.path(), "Docs")).await.err().unwrap();
        assert!(matches!(err, MemoryError::Config { .. }));
    }

    #[tokio::test]
    async fn default_is_vector_without_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(StoreConfig::new(dir.path(), "CustomerDocs")).await.unwrap();
        assert_eq!(store.name(), "vector");
        assert!(!dir.path().join("memory/CustomerDocs/vector_store.jsonl").exists());
    }

    #[tokio::test]
    async fn vector_store_path_override() {
        let dir = TempDir::new().unwrap();
        let component_dir = dir.path().join("memory").join("Docs");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(
            component_dir.join(COMPONENT_CONFIG_FILE),
            "vector_store:\n  type: sqlite\n  path: vectors.jsonl\n",
        )
        .unwrap();

        let store = open_store(StoreConfig::new(dir.path(), "Docs")).await.unwrap();
        store.ingest_documents(&["hello".to_string()]).await.unwrap();
        assert!(component_dir.join("vectors.jsonl").exists());
    }
}
