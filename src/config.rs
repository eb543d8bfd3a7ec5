//! TOML configuration.
//!
//! All settings are read from one file (default `./config/chk.toml`).
//! Only `[corpus]` and `[server]` are required; every other section falls
//! back to defaults matching the reference deployment (ada-002 embeddings,
//! gpt-4o generation, k = 15, 32 concurrent pipelines).
//!
//! Credentials never live in the file: remote providers read them from the
//! environment when the client is created (see [`crate::embedding`] and
//! [`crate::generation`]).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use compliance_harness_core::chunk::ChunkerSettings;

use crate::remote::call_budget;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// JSON array of source records.
    pub records_path: PathBuf,
    /// Binary snapshot written after the first build.
    pub snapshot_path: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_breakpoint_percentile")]
    pub breakpoint_percentile: f64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: default_min_chunk_chars(),
            breakpoint_percentile: default_breakpoint_percentile(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl ChunkingConfig {
    pub fn settings(&self) -> ChunkerSettings {
        ChunkerSettings {
            breakpoint_percentile: self.breakpoint_percentile,
            buffer_size: self.buffer_size,
        }
    }
}

fn default_min_chunk_chars() -> usize {
    55
}
fn default_breakpoint_percentile() -> f64 {
    88.0
}
fn default_buffer_size() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    /// Base URL override (OpenAI-compatible gateway, Azure endpoint, Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    /// Azure OpenAI `api-version` query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Inputs per embeddings request. OpenAI and Azure accept at most 2048.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: None,
            api_version: default_api_version(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: 0,
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bound for one embedding call including retries.
    pub fn call_budget(&self) -> Duration {
        call_budget(self.timeout(), self.max_retries)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("text-embedding-ada-002".to_string())
}
fn default_api_version() -> String {
    "2024-06-01".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    64
}

pub const MAX_EMBEDDING_BATCH: usize = 2048;

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Replaces the built-in system instructions when set.
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generation_model(),
            url: None,
            api_version: default_api_version(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: 0,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            system_prompt_path: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bound for one generation call including retries.
    pub fn call_budget(&self) -> Duration {
        call_budget(self.timeout(), self.max_retries)
    }
}

fn default_generation_model() -> Option<String> {
    Some("gpt-4o".to_string())
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    10_000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.95
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

const PROVIDERS: &[&str] = &["disabled", "openai", "azure", "ollama"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.corpus.top_k == 0 {
        anyhow::bail!("corpus.top_k must be >= 1");
    }

    let p = config.chunking.breakpoint_percentile;
    if !(p > 0.0 && p <= 100.0) {
        anyhow::bail!("chunking.breakpoint_percentile must be in (0, 100]");
    }

    if config.analysis.concurrency == 0 {
        anyhow::bail!("analysis.concurrency must be >= 1");
    }

    for (section, provider, model) in [
        (
            "embedding",
            &config.embedding.provider,
            &config.embedding.model,
        ),
        (
            "generation",
            &config.generation.provider,
            &config.generation.model,
        ),
    ] {
        if !PROVIDERS.contains(&provider.as_str()) {
            anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled, openai, azure, or ollama.",
                section,
                provider
            );
        }
        if provider != "disabled" && model.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!(
                "{}.model must be specified when provider is '{}'",
                section,
                provider
            );
        }
    }

    let batch = config.embedding.batch_size;
    if batch == 0 || batch > MAX_EMBEDDING_BATCH {
        anyhow::bail!("embedding.batch_size must be in 1..={}", MAX_EMBEDDING_BATCH);
    }

    if config.embedding.timeout_secs == 0 || config.generation.timeout_secs == 0 {
        anyhow::bail!("timeout_secs must be > 0");
    }

    Ok(())
}
