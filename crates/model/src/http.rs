//! HTTP inference provider.
//!
//! Speaks the hosted-inference wire format: `POST {endpoint}/{model_id}`
//! with `{"inputs", "parameters"}` and a JSON array of
//! `{"generated_text"}` in reply.

use async_trait::async_trait;
use cmp_core::{GenerationParams, ModelError, ModelProvider};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpInferenceProvider {
    url: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpInferenceProvider {
    pub fn new(
        endpoint: &str,
        model_id: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            url: format!("{}/{}", endpoint.trim_end_matches('/'), model_id),
            token: token.into(),
            timeout,
            client,
        })
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Serialize, Default)]
struct InferenceParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f64>,
}

impl From<&GenerationParams> for InferenceParameters {
    fn from(p: &GenerationParams) -> Self {
        Self {
            max_new_tokens: (p.max_new_tokens > 0).then_some(p.max_new_tokens),
            temperature: (p.temperature > 0.0).then_some(p.temperature),
            top_p: (p.top_p > 0.0).then_some(p.top_p),
            repetition_penalty: (p.repetition_penalty > 0.0).then_some(p.repetition_penalty),
        }
    }
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

#[async_trait]
impl ModelProvider for HttpInferenceProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        input: &str,
        params: &GenerationParams,
    ) -> Result<String, ModelError> {
        let body = InferenceRequest {
            inputs: input,
            parameters: params.into(),
        };

        debug!(url = %self.url, "Sending inference request");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        after: self.timeout,
                    }
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "Inference API returned error");
            return Err(ModelError::Api {
                status_code: status,
                message,
            });
        }

        let outputs: Vec<GeneratedText> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout {
                    after: self.timeout,
                }
            } else {
                ModelError::InvalidResponse(e.to_string())
            }
        })?;

        outputs
            .into_iter()
            .next()
            .map(|o| o.generated_text)
            .ok_or_else(|| ModelError::InvalidResponse("empty generation list".into()))
    }
}
