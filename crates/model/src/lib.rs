//! Text-generation providers for the CMP runtime.
//!
//! All providers implement [`cmp_core::ModelProvider`]. [`from_config`]
//! picks one from the `[model]` section, or none when generation is off and
//! the rendered prompt is the response.

pub mod http;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use cmp_config::AppConfig;
use cmp_core::{GenerationParams, ModelError, ModelProvider};

pub use http::HttpInferenceProvider;
pub use local::LocalProcessProvider;

/// Build the configured provider. `lookup` supplies `HF_TOKEN`.
pub fn from_config<F>(
    config: &AppConfig,
    lookup: F,
) -> Result<Option<Arc<dyn ModelProvider>>, ModelError>
where
    F: Fn(&str) -> Option<String>,
{
    let model = &config.model;
    let token = lookup("HF_TOKEN").filter(|t| !t.trim().is_empty());

    let provider: Arc<dyn ModelProvider> = match model.provider.as_str() {
        "none" => return Ok(None),
        "auto" => match token {
            Some(token) if !model.model_id.is_empty() => Arc::new(http_provider(config, token)?),
            _ => return Ok(None),
        },
        "http" => {
            let token =
                token.ok_or_else(|| ModelError::NotConfigured("HF_TOKEN is not set".into()))?;
            if model.model_id.is_empty() {
                return Err(ModelError::NotConfigured("HF_MODEL_ID is not set".into()));
            }
            Arc::new(http_provider(config, token)?)
        }
        "local" => {
            let script = config.model_script_path();
            if !script.is_file() {
                return Err(ModelError::NotConfigured(format!(
                    "local provider script not found at {}",
                    script.display()
                )));
            }
            Arc::new(
                LocalProcessProvider::new(&model.program)
                    .arg(script.to_string_lossy())
                    .working_dir(&config.project_root)
                    .timeout(Duration::from_secs(model.local_timeout_secs)),
            )
        }
        other => {
            return Err(ModelError::NotConfigured(format!(
                "unknown model provider '{other}'"
            )));
        }
    };

    tracing::info!(provider = provider.name(), "Model provider configured");
    Ok(Some(provider))
}

/// Sampling parameters from the `[model]` section.
pub fn params_from_config(config: &AppConfig) -> GenerationParams {
    GenerationParams {
        temperature: config.model.temperature,
        top_p: config.model.top_p,
        max_new_tokens: config.model.max_new_tokens,
        repetition_penalty: 0.0,
    }
}

fn http_provider(config: &AppConfig, token: String) -> Result<HttpInferenceProvider, ModelError> {
    HttpInferenceProvider::new(
        &config.model.endpoint,
        &config.model.model_id,
        token,
        Duration::from_secs(config.model.http_timeout_secs),
    )
}
