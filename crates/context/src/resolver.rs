//! Context resolution with tenant overrides and a process-lifetime cache.
//!
//! Lookup order for `(tenant, name)`:
//! 1. `contexts/tenants/<tenant>/<name>.ctx` (only when a tenant is given)
//! 2. `contexts/<name>/<lowercase name>.ctx`, `rag_agent.ctx`,
//!    `workflow_coordinator.ctx`
//! 3. every other `*.ctx` under `contexts/<name>/`, in file-name order
//!
//! The first candidate that loads and validates wins. Failures along the way
//! are remembered and the most recent one is returned only if nothing
//! succeeds.

use cmp_core::context::Context;
use cmp_core::error::ContextError;
use cmp_core::paths::{is_plain_segment, sanitize_segment};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{ContextDocument, Merge};
use crate::schema;

/// Deepest `extends`/`include` chain followed before giving up.
pub const MAX_MERGE_DEPTH: usize = 5;

/// Well-known file names tried before the directory walk.
const PREFERRED_FILES: &[&str] = &["rag_agent.ctx", "workflow_coordinator.ctx"];

/// Resolves, validates and caches contexts under one project root.
pub struct ContextResolver {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<Context>>>,
    loads: AtomicUsize,
}

impl ContextResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
            cache: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// Resolve a context, serving repeated lookups from the cache.
    pub async fn resolve(&self, tenant_id: &str, name: &str) -> Result<Arc<Context>, ContextError> {
        if !is_plain_segment(name) {
            return Err(ContextError::InvalidName(name.to_string()));
        }

        let key = format!("{tenant_id}|{name}");
        if let Some(ctx) = self.cache.read().await.get(&key) {
            debug!(key = %key, "Context cache hit");
            return Ok(Arc::clone(ctx));
        }

        debug!(key = %key, "Context cache miss");
        self.loads.fetch_add(1, Ordering::Relaxed);

        let root = self.root.clone();
        let tenant = tenant_id.to_string();
        let owned_name = name.to_string();
        let loaded = tokio::task::spawn_blocking(move || load_first(&root, &tenant, &owned_name))
            .await
            .map_err(|e| ContextError::Read {
                path: self.root.clone(),
                reason: e.to_string(),
            })??;

        let mut cache = self.cache.write().await;
        let entry = cache.entry(key).or_insert_with(|| Arc::new(loaded));
        Ok(Arc::clone(entry))
    }

    /// Drop every cached context. The next lookup re-reads from disk.
    pub async fn reload(&self) {
        let mut cache = self.cache.write().await;
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "Context cache cleared");
    }

    /// Number of cache misses that went to disk.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

/// Candidate files in lookup order, without duplicates.
pub fn candidate_paths(root: &Path, tenant_id: &str, name: &str) -> Vec<PathBuf> {
    let contexts = root.join("contexts");
    let mut paths = Vec::new();

    if !tenant_id.is_empty() {
        paths.push(
            contexts
                .join("tenants")
                .join(sanitize_segment(tenant_id))
                .join(format!("{name}.ctx")),
        );
    }

    let global_dir = contexts.join(name);
    paths.push(global_dir.join(format!("{}.ctx", name.to_lowercase())));
    paths.extend(PREFERRED_FILES.iter().map(|f| global_dir.join(f)));

    let walked = WalkDir::new(&global_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(".ctx")
        })
        .map(|entry| entry.into_path());
    paths.extend(walked);

    let mut unique = Vec::with_capacity(paths.len());
    for path in paths {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

fn load_first(root: &Path, tenant_id: &str, name: &str) -> Result<Context, ContextError> {
    let mut last_error = None;

    for path in candidate_paths(root, tenant_id, name) {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                last_error = Some(ContextError::Read {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match load_candidate(&path, &bytes) {
            Ok(ctx) => {
                info!(path = %path.display(), name = %ctx.name, version = %ctx.version, "Context loaded");
                return Ok(ctx);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Context candidate rejected");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ContextError::NotFound {
        name: name.to_string(),
    }))
}

fn load_candidate(path: &Path, bytes: &[u8]) -> Result<Context, ContextError> {
    schema::validate_raw(bytes).map_err(|reason| ContextError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;

    let ctx = load_and_merge(path, 0)?.into_context();
    ctx.validate().map_err(|reason| ContextError::Invalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })?;
    Ok(ctx)
}

/// Parent first, then each include, then the file itself.
fn load_and_merge(path: &Path, depth: usize) -> Result<ContextDocument, ContextError> {
    if depth > MAX_MERGE_DEPTH {
        return Err(ContextError::DepthExceeded {
            path: path.to_path_buf(),
            max_depth: MAX_MERGE_DEPTH,
        });
    }

    let raw = std::fs::read(path).map_err(|e| ContextError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let current: ContextDocument =
        serde_yaml::from_slice(&raw).map_err(|e| ContextError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut merged = match current.extends.as_deref().filter(|p| !p.is_empty()) {
        Some(parent) => load_and_merge(&resolve_relative(path, parent), depth + 1)?,
        None => ContextDocument::default(),
    };

    for include in current.include.iter().flatten().filter(|p| !p.is_empty()) {
        let fragment = load_and_merge(&resolve_relative(path, include), depth + 1)?;
        merged.merge_from(fragment);
    }

    merged.merge_from(current);
    merged.strip_meta();
    Ok(merged)
}

fn resolve_relative(base_file: &Path, relative: &str) -> PathBuf {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    base_file
        .parent()
        .map(|dir| dir.join(relative))
        .unwrap_or_else(|| relative.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn minimal(name: &str, persona: &str) -> String {
        format!("name: \"{name}\"\nversion: \"1.0.0\"\nrole:\n  persona: \"{persona}\"\n")
    }

    #[tokio::test]
    async fn resolves_global_context() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contexts/Foo/Foo.ctx", &minimal("Foo", "Test Persona"));

        let resolver = ContextResolver::new(dir.path());
        let ctx = resolver.resolve("", "Foo").await.unwrap();
        assert_eq!(ctx.name, "Foo");
        assert_eq!(ctx.role.persona, "Test Persona");
    }

    #[tokio::test]
    async fn tenant_file_overrides_global() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contexts/Foo/Foo.ctx", &minimal("Foo", "Global Persona"));
        write(dir.path(), "contexts/tenants/acme/Foo.ctx", &minimal("Foo", "Tenant Persona"));

        let resolver = ContextResolver::new(dir.path());
        let tenant = resolver.resolve("acme", "Foo").await.unwrap();
        assert_eq!(tenant.role.persona, "Tenant Persona");

        let other = resolver.resolve("globex", "Foo").await.unwrap();
        assert_eq!(other.role.persona, "Global Persona");
    }

    #[tokio::test]
    async fn extends_and_include_merge() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "contexts/Foo/base.yaml",
            "name: Base\nversion: '1.0.0'\nrole:\n  persona: Base Persona\n  capabilities: [a, b]\ntools:\n  - name: base_tool\n    uri: mcp://base\nguardrails:\n  format: markdown\n",
        );
        write(
            dir.path(),
            "contexts/Foo/frag.yaml",
            "tools:\n  - name: include_tool\n    uri: mcp://inc\n",
        );
        write(
            dir.path(),
            "contexts/Foo/Foo.ctx",
            "extends: base.yaml\ninclude: [frag.yaml]\nname: Foo\nversion: '1.0.0'\nrole:\n  persona: Main Persona\n  capabilities: [b, c]\n",
        );

        let resolver = ContextResolver::new(dir.path());
        let ctx = resolver.resolve("", "Foo").await.unwrap();
        assert_eq!(ctx.name, "Foo");
        assert_eq!(ctx.role.persona, "Main Persona");
        assert_eq!(ctx.role.capabilities, vec!["a", "b", "c"]);
        let tools: Vec<_> = ctx.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, vec!["base_tool", "include_tool"]);
        assert_eq!(ctx.guardrails.format, "markdown");
    }

    #[tokio::test]
    async fn five_levels_of_extends_are_allowed() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "contexts/Foo/Foo.ctx",
            &format!("extends: l1.yaml\n{}", minimal("Foo", "Top")),
        );
        for level in 1..5 {
            write(
                dir.path(),
                &format!("contexts/Foo/l{level}.yaml"),
                &format!("extends: l{}.yaml\nmetadata:\n  l{level}: yes\n", level + 1),
            );
        }
        write(dir.path(), "contexts/Foo/l5.yaml", "description: deepest\n");

        let resolver = ContextResolver::new(dir.path());
        let ctx = resolver.resolve("", "Foo").await.unwrap();
        assert_eq!(ctx.description, "deepest");
        assert_eq!(ctx.metadata.len(), 4);
    }

    #[tokio::test]
    async fn self_extending_context_exceeds_depth() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "contexts/Foo/Foo.ctx",
            &format!("extends: Foo.ctx\n{}", minimal("Foo", "Loop")),
        );

        let resolver = ContextResolver::new(dir.path());
        let err = resolver.resolve("", "Foo").await.unwrap_err();
        assert!(matches!(err, ContextError::DepthExceeded { max_depth: 5, .. }));
    }

    #[tokio::test]
    async fn missing_context_is_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = ContextResolver::new(dir.path());
        let err = resolver.resolve("acme", "Ghost").await.unwrap_err();
        assert!(matches!(err, ContextError::NotFound { ref name } if name == "Ghost"));
    }

    #[tokio::test]
    async fn invalid_candidate_reports_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contexts/Foo/Foo.ctx", "name: Foo\nversion: '1'\n");

        let resolver = ContextResolver::new(dir.path());
        match resolver.resolve("", "Foo").await.unwrap_err() {
            ContextError::Invalid { path, reason } => {
                assert!(path.ends_with("Foo.ctx"));
                assert!(reason.contains("role"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn later_candidate_succeeds_after_invalid_one() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contexts/tenants/acme/Foo.ctx", "name: Foo\n");
        write(dir.path(), "contexts/Foo/agent.ctx", &minimal("Foo", "Fallback"));

        let resolver = ContextResolver::new(dir.path());
        let ctx = resolver.resolve("acme", "Foo").await.unwrap();
        assert_eq!(ctx.role.persona, "Fallback");
    }

    #[tokio::test]
    async fn cache_serves_same_instance_until_reload() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contexts/Foo/Foo.ctx", &minimal("Foo", "First"));

        let resolver = ContextResolver::new(dir.path());
        let a = resolver.resolve("acme", "Foo").await.unwrap();
        write(dir.path(), "contexts/Foo/Foo.ctx", &minimal("Foo", "Second"));
        let b = resolver.resolve("acme", "Foo").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.role.persona, "First");
        assert_eq!(resolver.load_count(), 1);

        resolver.reload().await;
        let c = resolver.resolve("acme", "Foo").await.unwrap();
        assert_eq!(c.role.persona, "Second");
        assert_eq!(resolver.load_count(), 2);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let resolver = ContextResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve("", "../secrets").await,
            Err(ContextError::InvalidName(_))
        ));
        assert!(matches!(
            resolver.resolve("", "").await,
            Err(ContextError::InvalidName(_))
        ));
    }

    #[test]
    fn tenant_segment_is_sanitised() {
        let paths = candidate_paths(Path::new("/p"), "../evil", "Foo");
        assert_eq!(paths[0], PathBuf::from("/p/contexts/tenants/_evil/Foo.ctx"));
        assert_eq!(paths[1], PathBuf::from("/p/contexts/Foo/foo.ctx"));
    }
}
