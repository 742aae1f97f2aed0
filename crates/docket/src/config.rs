use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use docket_core::embedding::EMBEDDING_DIMS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub answerer: AnswererConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub url: String,
    /// Upper bound on pooled connections (base pool plus overflow).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Connections are recycled after this long.
    #[serde(default = "default_recycle_secs")]
    pub recycle_secs: u64,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    30
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_recycle_secs() -> u64 {
    3600
}
fn default_statement_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_relaxed_threshold")]
    pub relaxed_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            similarity_threshold: default_similarity_threshold(),
            relaxed_threshold: default_relaxed_threshold(),
        }
    }
}

fn default_limit() -> i64 {
    5
}
fn default_similarity_threshold() -> f64 {
    0.2
}
fn default_relaxed_threshold() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Override the service base URL (used by tests).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            api_key_env: default_api_key_env(),
            url: None,
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    EMBEDDING_DIMS
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswererConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_answer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_answer_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for AnswererConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: default_api_key_env(),
            url: None,
            timeout_secs: default_answer_timeout_secs(),
            max_retries: default_answer_retries(),
            temperature: default_temperature(),
        }
    }
}

fn default_answer_timeout_secs() -> u64 {
    60
}
fn default_answer_retries() -> u32 {
    2
}
fn default_temperature() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_jitter_ms() -> u64 {
    250
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.target_chars");
    }

    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    for (name, value) in [
        ("retrieval.similarity_threshold", config.retrieval.similarity_threshold),
        ("retrieval.relaxed_threshold", config.retrieval.relaxed_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims != EMBEDDING_DIMS {
            anyhow::bail!(
                "embedding.dims must be {} to match the stored vector column",
                EMBEDDING_DIMS
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    match config.answerer.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown answerer provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }
    if config.answerer.provider == "gemini" && config.answerer.model.is_none() {
        anyhow::bail!("answerer.model must be specified when provider is 'gemini'");
    }

    if config.retry.attempts == 0 {
        anyhow::bail!("retry.attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("[db]\nurl = \"postgres://localhost/docket\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.target_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.limit, 5);
        assert_eq!(config.db.max_connections, 30);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.retry.attempts, 3);
    }

    #[test]
    fn enabled_embedding_requires_a_model() {
        let file = write_config(
            "[db]\nurl = \"postgres://localhost/docket\"\n[embedding]\nprovider = \"gemini\"\n",
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn overlap_must_be_smaller_than_target() {
        let file = write_config(
            "[db]\nurl = \"postgres://localhost/docket\"\n[chunking]\ntarget_chars = 100\noverlap_chars = 100\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let file = write_config(
            "[db]\nurl = \"postgres://localhost/docket\"\n[embedding]\nprovider = \"openai\"\nmodel = \"x\"\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn thresholds_must_be_unit_interval() {
        let file = write_config(
            "[db]\nurl = \"postgres://localhost/docket\"\n[retrieval]\nsimilarity_threshold = 1.5\n",
        );
        assert!(load_config(file.path()).is_err());
    }
}
