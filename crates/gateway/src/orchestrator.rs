//! The chat request pipeline.
//!
//! Stages run in order and the first failure ends the request:
//!
//! 1. authenticate (when API keys are configured)
//! 2. rate limit per key, tenant and client IP
//! 3. authorize `chat:execute` for the tenant
//! 4. prompt-injection risk and PII checks on the query
//! 5. out-of-band action policy
//! 6. resolve the Context, then check the requested action against it
//! 7. memory search (component and query both present)
//! 8. render the selected prompt file
//! 9. generate from the rendered prompt (when a model is configured)
//! 10. citation policy, then guardrails (token trim + format)
//! 11. drift of the response from its memory sources

use cmp_core::error::{Error, MemoryError, PolicyViolation, PromptError};
use cmp_core::{MemoryStore, ModelProvider, Principal, SearchResult};
use cmp_memory::{Provider, StoreConfig, open_store};
use cmp_prompt::{enforce_guardrails, grounding_drift, validate_capabilities};
use cmp_security::{
    Action, AuditEvent, AuditResult, LimiterKey, PiiMode, PromptRisk, Resource, check_permission,
    retry_after_secs, sanitize_user_input,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::GatewayState;

/// Body of `POST /api/v1/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub query: String,
    /// Zero or negative uses the configured default.
    #[serde(default)]
    pub top_k: i64,
    /// Extra template data; keys here win over `context` and `results`.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Must be one of the allowed prompt files; defaults to the configured one.
    #[serde(default)]
    pub prompt_file: Option<String>,
    /// Optional action checked against capabilities and out-of-band policy.
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub rendered: String,
}

/// Transport facts about the caller.
#[derive(Debug, Clone)]
pub struct CallerInfo {
    pub request_id: String,
    pub authorization: Option<String>,
    pub client_ip: String,
}

/// Run one chat request through every stage and audit the outcome.
pub async fn handle_chat(
    state: &GatewayState,
    request: ChatRequest,
    caller: &CallerInfo,
) -> Result<ChatResponse, Error> {
    let mut principal = None;
    let outcome = run(state, request.clone(), caller, &mut principal).await;

    match &outcome {
        Ok(_) => {
            audit(state, &request, caller, principal.as_ref(), AuditResult::Success, None).await
        }
        Err(e) if e.is_security_relevant() => {
            warn!(error = %e, "Chat request rejected");
            audit(
                state,
                &request,
                caller,
                principal.as_ref(),
                AuditResult::Denied,
                Some(e.to_string()),
            )
            .await;
        }
        Err(e) => warn!(error = %e, "Chat request failed"),
    }
    outcome
}

async fn run(
    state: &GatewayState,
    mut request: ChatRequest,
    caller: &CallerInfo,
    principal_out: &mut Option<Principal>,
) -> Result<ChatResponse, Error> {
    let config = &state.config;

    // Authentication
    let principal = if state.keys.is_empty() {
        Principal::anonymous()
    } else {
        state.keys.authenticate(caller.authorization.as_deref())?
    };
    *principal_out = Some(principal.clone());

    // Rate limiting
    let key = LimiterKey::new(&principal.key_id, &request.tenant_id, &caller.client_ip);
    if let Err(wait) = state.limiter.check(&key, principal.rate_limit) {
        state.metrics.inc_rate_limited();
        return Err(Error::RateLimited {
            retry_after_secs: retry_after_secs(wait),
        });
    }

    // Authorization
    if !principal.is_anonymous() {
        let resource = Resource::new("chat", &request.component, &request.tenant_id);
        if !check_permission(&principal, &resource, Action::Execute) {
            return Err(Error::Authorization(format!(
                "key '{}' may not execute chat for tenant '{}'",
                principal.key_id, request.tenant_id
            )));
        }
    }

    // Input guards
    let extras: Vec<String> = request
        .data
        .values()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let risk = state.classifier.classify(&request.query, &extras);
    if risk > PromptRisk::Low {
        state.metrics.inc_prompt_injection();
        info!(%risk, "Prompt injection heuristics matched");
    }
    if config.security.pi_enforcement && risk == PromptRisk::High {
        state.metrics.inc_blocked_response();
        return Err(PolicyViolation::PromptInjection {
            risk: risk.to_string(),
        }
        .into());
    }
    if risk > PromptRisk::Low {
        request.query = sanitize_user_input(&request.query);
        for value in request.data.values_mut() {
            if let Value::String(text) = value {
                *text = sanitize_user_input(text);
            }
        }
    }

    match state.policy.pii_mode {
        PiiMode::Block if state.pii.detect(&request.query) => {
            state.metrics.inc_policy_violation();
            return Err(PolicyViolation::PiiDetected.into());
        }
        PiiMode::Redact => request.query = state.pii.redact(&request.query),
        _ => {}
    }

    let action = request.action.clone().unwrap_or_default();
    if !action.is_empty()
        && let Err(v) = state.policy.check_action(&action)
    {
        state.metrics.inc_policy_violation();
        return Err(v.into());
    }

    // Context
    let ctx = state
        .resolver
        .resolve(&request.tenant_id, &request.context)
        .await?;
    validate_capabilities(&ctx, &action)?;

    let prompt_file = request
        .prompt_file
        .clone()
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| config.prompts.default_file.clone());
    if !config.prompts.allowed_files.contains(&prompt_file) {
        return Err(Error::Validation(format!(
            "prompt file '{prompt_file}' is not allowed"
        )));
    }

    // Memory
    let results = if !request.component.is_empty() && !request.query.is_empty() {
        search_memory(state, &request).await?
    } else {
        Vec::new()
    };

    // Template data; request data wins on collisions
    let mut data = Map::new();
    data.insert("context".into(), serde_json::to_value(&*ctx)?);
    data.insert("results".into(), serde_json::to_value(&results)?);
    data.extend(request.data);

    let started = Instant::now();
    let rendered = state
        .prompts
        .render_file_async(&request.component, &prompt_file, data)
        .await;
    state
        .metrics
        .observe_render(&request.component, started.elapsed());
    let rendered = rendered?;

    let rendered = match &state.model {
        Some(model) => generate(state, model.as_ref(), &rendered).await?,
        None => rendered,
    };

    // Output policy
    if config.security.require_citation
        && state.policy.no_unsupported_claims
        && let Err(v) = state.citations.check(&rendered, results.len())
    {
        state.metrics.inc_policy_violation();
        state.metrics.inc_blocked_response();
        return Err(v.into());
    }

    let rendered = enforce_guardrails(&ctx, &rendered).map_err(|e| match e {
        PromptError::Format { .. } => Error::Policy(PolicyViolation::Guardrail(e.to_string())),
        other => Error::Prompt(other),
    })?;

    let rendered = if state.policy.pii_mode == PiiMode::Redact {
        state.pii.redact(&rendered)
    } else {
        rendered
    };

    let sources: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    if let Some(drift) = grounding_drift(&rendered, &sources) {
        state.metrics.set_drift_score(&request.component, drift);
        if 1.0 - drift < ctx.testing.drift_threshold {
            debug!(
                drift,
                threshold = ctx.testing.drift_threshold,
                "Response drifted from memory sources"
            );
        }
    }

    debug!(results = results.len(), bytes = rendered.len(), "Chat rendered");
    Ok(ChatResponse { rendered })
}

/// Send the rendered prompt to the model. Any failure, a timeout included,
/// is a failed dependency.
async fn generate(
    state: &GatewayState,
    model: &dyn ModelProvider,
    prompt: &str,
) -> Result<String, Error> {
    let started = Instant::now();
    match model.generate(prompt, &state.generation).await {
        Ok(output) => {
            debug!(
                provider = model.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation finished"
            );
            Ok(output)
        }
        Err(e) => {
            warn!(provider = model.name(), error = %e, "Generation failed");
            Err(e.into())
        }
    }
}

/// Search the component's store. Failures only end the request when the
/// citation policy makes memory mandatory.
async fn search_memory(
    state: &GatewayState,
    request: &ChatRequest,
) -> Result<Vec<SearchResult>, Error> {
    let config = &state.config;
    let top_k = usize::try_from(request.top_k)
        .ok()
        .filter(|k| *k > 0)
        .unwrap_or(config.memory.default_top_k);

    let started = Instant::now();
    let outcome: Result<Vec<SearchResult>, MemoryError> = async {
        let provider: Provider = config.memory.provider.parse()?;
        let store_config = StoreConfig::new(config.project_root.clone(), &request.component)
            .with_provider(provider)
            .with_tenant(&request.tenant_id)
            .with_embedding(&config.memory.embedding_model, config.memory.embedding_dim)
            .with_key_provider(Arc::clone(&state.episodic_keys));
        let store = open_store(store_config).await?;
        let results = store.search(&request.query, top_k).await;
        if let Err(e) = store.close().await {
            warn!(error = %e, "Memory store close failed");
        }
        results
    }
    .await;
    state
        .metrics
        .observe_memory_search(&request.component, started.elapsed());

    match outcome {
        Ok(results) => Ok(results),
        Err(e) if config.security.require_citation => Err(Error::Memory(e)),
        Err(e) => {
            warn!(error = %e, component = %request.component, "Memory search failed, continuing without results");
            Ok(Vec::new())
        }
    }
}

async fn audit(
    state: &GatewayState,
    request: &ChatRequest,
    caller: &CallerInfo,
    principal: Option<&Principal>,
    result: AuditResult,
    reason: Option<String>,
) {
    let mut event = AuditEvent::new(
        &caller.request_id,
        "chat:execute",
        format!("chat/{}", request.component),
        result,
    )
    .tenant(&request.tenant_id)
    .actor(principal.map(|p| p.key_id.as_str()).unwrap_or_default())
    .attribute("client_ip", caller.client_ip.as_str());
    if let Some(reason) = reason {
        event = event.reason(reason);
    }
    let logger = Arc::clone(&state.audit);
    if let Err(e) = tokio::task::spawn_blocking(move || logger.log(event)).await {
        warn!(error = %e, "Audit task failed");
    }
}
