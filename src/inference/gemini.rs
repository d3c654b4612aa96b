//! Gemini adapter — `generateContent` REST calls via reqwest.
//!
//! Stateless. Retries transient HTTP failures with jittered backoff; when
//! retries are exhausted the adapter degrades instead of erroring —
//! classification falls back to keyword heuristics and drafting to a
//! canned reply. Callers only see `Err` for non-recoverable setup issues.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::InferenceError;
use crate::inference::{
    DraftRequest, FALLBACK_REPLY, Inference, build_classify_prompt, build_draft_prompt,
    heuristic_classify, normalize_classification,
};
use crate::pipeline::context::Category;

/// Base delay between retry attempts.
const RETRY_BASE_MS: u64 = 500;

/// Max random jitter added to each retry delay.
const RETRY_JITTER_MS: u64 = 250;

/// Gemini adapter configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// REST base, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub api_base: String,
    pub api_key: SecretString,
    pub model: String,
    pub request_timeout: Duration,
    pub max_retries: usize,
}

/// Gemini REST client.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::RequestFailed(format!("client build: {e}")))?;
        Ok(Self { http, config })
    }

    fn generate_content_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }

    /// One prompt in, one text completion out, with bounded retries.
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let url = self.generate_content_url();
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
                let delay = RETRY_BASE_MS * (1u64 << (attempt - 1)) + jitter;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let response = self
                .http
                .post(&url)
                .query(&[("key", self.config.api_key.expose_secret())])
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let value: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
                    return extract_candidate_text(&value);
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("HTTP {status}");
                    // Client errors other than rate limiting won't heal on retry
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                    tracing::warn!(attempt, status = %status, "Gemini request failed, retrying");
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %e, "Gemini request error, retrying");
                }
            }
        }

        Err(InferenceError::RequestFailed(last_error))
    }
}

/// Pull the first candidate's text out of a `generateContent` response.
fn extract_candidate_text(value: &serde_json::Value) -> Result<String, InferenceError> {
    value["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            InferenceError::InvalidResponse("no candidate text in response".to_string())
        })
}

#[async_trait]
impl Inference for GeminiClient {
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<Category, InferenceError> {
        let prompt = build_classify_prompt(subject, body, sender);
        match self.generate(&prompt).await {
            Ok(raw) => {
                let category = normalize_classification(&raw);
                tracing::info!(category = %category, "Email classified");
                Ok(category)
            }
            Err(e) => {
                // Model down/quota exhausted — keyword heuristics keep
                // actionable mail surfaced.
                tracing::error!(error = %e, "Classification call failed, using heuristics");
                Ok(heuristic_classify(subject, body))
            }
        }
    }

    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, InferenceError> {
        let prompt = build_draft_prompt(&request);
        match self.generate(&prompt).await {
            Ok(reply) if !reply.is_empty() => {
                tracing::info!(sender = %request.sender, "Generated reply draft");
                Ok(reply)
            }
            Ok(_) => {
                tracing::warn!("Empty reply generated, using fallback");
                Ok(FALLBACK_REPLY.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "Draft call failed, using fallback");
                Ok(FALLBACK_REPLY.to_string())
            }
        }
    }
}
