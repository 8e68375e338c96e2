//! Template loading, compilation cache and rendering.
//!
//! Templates live under `prompts/<component>/` and use Jinja syntax. Besides
//! the built-in filters, every template can call:
//!
//! | function | effect |
//! |---|---|
//! | `join(list, sep)` | join items with `sep` |
//! | `upper(s)` / `lower(s)` / `trim(s)` | case and whitespace helpers |
//! | `toJSON(v)` | JSON encoding of any value |
//! | `include(path, data)` | render a sibling fragment against `data` |
//!
//! Fragments pulled in by `include` get the same helpers except `include`
//! itself.

use cmp_core::error::PromptError;
use cmp_core::paths::is_plain_segment;
use minijinja::{Environment, Error, ErrorKind, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Name under which a file's source is registered in its environment.
const ENTRY_TEMPLATE: &str = "entry";

/// Compiles prompt files once and renders them on demand.
pub struct PromptEngine {
    root: PathBuf,
    cache: RwLock<HashMap<PathBuf, Arc<Environment<'static>>>>,
}

impl PromptEngine {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Render `prompts/<component>/<rel_path>` against `data`.
    ///
    /// The first call for a path compiles and caches the template; later calls
    /// reuse it even if the file changes, until [`clear_cache`](Self::clear_cache).
    pub fn render_file(
        &self,
        component: &str,
        rel_path: &str,
        data: &Map<String, JsonValue>,
    ) -> Result<String, PromptError> {
        // An empty component renders from `prompts/` itself.
        if !component.is_empty() && !is_plain_segment(component) {
            return Err(PromptError::InvalidPath(component.to_string()));
        }
        check_relative(rel_path)?;

        let path = self.root.join("prompts").join(component).join(rel_path);
        let env = self.load(&path)?;
        let template = env
            .get_template(ENTRY_TEMPLATE)
            .map_err(|e| render_error(&path, e))?;
        template.render(data).map_err(|e| render_error(&path, e))
    }

    /// [`render_file`](Self::render_file) on the blocking pool, so template
    /// and fragment reads stay off the async workers.
    pub async fn render_file_async(
        self: &Arc<Self>,
        component: &str,
        rel_path: &str,
        data: Map<String, JsonValue>,
    ) -> Result<String, PromptError> {
        let engine = Arc::clone(self);
        let (component, rel_path) = (component.to_string(), rel_path.to_string());
        let path = self.root.join("prompts").join(&component).join(&rel_path);
        tokio::task::spawn_blocking(move || engine.render_file(&component, &rel_path, &data))
            .await
            .map_err(|e| PromptError::Render {
                path,
                reason: format!("render task failed: {e}"),
            })?
    }

    /// Drop all compiled templates. Edited files are picked up afterwards.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn load(&self, path: &Path) -> Result<Arc<Environment<'static>>, PromptError> {
        if let Some(env) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(env));
        }

        let source = read_template(path)?;
        let mut env = base_environment();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        env.add_function("include", move |rel: String, data: Value| {
            include_fragment(&dir, &rel, data)
        });
        env.add_template_owned(ENTRY_TEMPLATE, source)
            .map_err(|e| PromptError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!(path = %path.display(), "Template compiled");

        let env = Arc::new(env);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entry(path.to_path_buf()).or_insert(env);
        Ok(Arc::clone(entry))
    }
}

/// Environment with every helper except `include`.
fn base_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_function("join", join);
    env.add_function("upper", |s: String| s.to_uppercase());
    env.add_function("lower", |s: String| s.to_lowercase());
    env.add_function("trim", |s: String| s.trim().to_string());
    env.add_function("toJSON", to_json);
    env
}

fn join(items: Value, sep: Option<String>) -> Result<String, Error> {
    let parts: Vec<String> = items.try_iter()?.map(|v| v.to_string()).collect();
    Ok(parts.join(sep.as_deref().unwrap_or("")))
}

fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("toJSON failed: {e}")))
}

fn include_fragment(dir: &Path, rel: &str, data: Value) -> Result<String, Error> {
    check_relative(rel).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let path = dir.join(rel);
    let source = std::fs::read_to_string(&path).map_err(|e| {
        Error::new(
            ErrorKind::TemplateNotFound,
            format!("include '{}': {e}", path.display()),
        )
    })?;
    base_environment().render_str(&source, data)
}

/// Template paths must stay below their component directory.
fn check_relative(rel: &str) -> Result<(), PromptError> {
    let path = Path::new(rel);
    let escapes = rel.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PromptError::InvalidPath(rel.to_string()));
    }
    Ok(())
}

fn read_template(path: &Path) -> Result<String, PromptError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PromptError::NotFound {
            path: path.to_path_buf(),
        },
        _ => PromptError::Render {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })
}

fn render_error(path: &Path, err: Error) -> PromptError {
    PromptError::Render {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
