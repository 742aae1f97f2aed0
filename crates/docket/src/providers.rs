//! HTTP providers for the embedding and answer-generation services.
//!
//! Both talk to the Google Generative Language API over `reqwest` with a
//! request timeout and bounded exponential-backoff retry:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A `disabled` provider of each kind always errors, for deployments
//! that run lexical-only retrieval or have no answer generator wired up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use docket_core::context::AnswerGenerator;
use docket_core::embedding::{normalize_vector, Embedder};
use docket_core::error::EmbedError;

use crate::config::{AnswererConfig, EmbeddingConfig};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instantiate the configured [`Embedder`].
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Instantiate the configured [`AnswerGenerator`].
pub fn create_answerer(config: &AnswererConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledAnswerer)),
        "gemini" => Ok(Arc::new(GeminiAnswerer::new(config)?)),
        other => bail!("Unknown answerer provider: {}", other),
    }
}

fn api_key_from_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

// ============ Disabled providers ============

/// Always fails; retrieval degrades to lexical search.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Always fails; the chat layer substitutes its apology text.
pub struct DisabledAnswerer;

#[async_trait]
impl AnswerGenerator for DisabledAnswerer {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("answer provider is disabled")
    }
}

// ============ Gemini embedding provider ============

/// Embedding provider backed by the `embedContent` endpoint.
///
/// The same call embeds fragments and queries; there is no separate
/// query mode. Vectors are unit-normalized before being returned.
pub struct GeminiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Gemini provider"))?;
        let api_key = api_key_from_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [ { "text": text } ] },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            let resp = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
                        let vector = parse_embed_response(&json, self.dims)?;
                        return normalize_vector(vector);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(EmbedError::Unavailable(format!(
                            "embedding API error {status}"
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EmbedError::Unavailable(format!(
                        "embedding API error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(EmbedError::Unavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EmbedError::Unavailable("embedding failed after retries".into())))
    }
}

/// Pull the vector out of an `embedContent` response, checking the
/// dimensionality against the configured model.
fn parse_embed_response(json: &serde_json::Value, dims: usize) -> Result<Vec<f32>, EmbedError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            EmbedError::Unavailable("invalid embedding response: missing embedding.values".into())
        })?;

    if values.len() != dims {
        return Err(EmbedError::Unavailable(format!(
            "unexpected embedding dimension: got {}, expected {}",
            values.len(),
            dims
        )));
    }

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Gemini answer provider ============

/// Answer generator backed by the `generateContent` endpoint. The
/// grounding policy travels as the system instruction; context, history,
/// and the question travel as the single user turn.
pub struct GeminiAnswerer {
    model: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
    temperature: f64,
    client: reqwest::Client,
}

impl GeminiAnswerer {
    pub fn new(config: &AnswererConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("answerer.model required for Gemini provider"))?;
        let api_key = api_key_from_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GeminiAnswerer {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = serde_json::json!({
            "system_instruction": { "parts": [ { "text": system } ] },
            "contents": [ { "role": "user", "parts": [ { "text": user } ] } ],
            "generationConfig": { "temperature": self.temperature },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            let resp = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_answer_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "answer API error, retrying");
                        last_err = Some(anyhow::anyhow!("answer API error {status}"));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("answer API error {status}: {body_text}");
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("answer generation failed after retries")))
    }
}

/// Join the text parts of the first candidate of a `generateContent`
/// response.
fn parse_answer_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid answer response: missing candidates"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        bail!("invalid answer response: empty candidate text");
    }
    Ok(text)
}
