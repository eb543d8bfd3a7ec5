//! Generation service clients.
//!
//! Each [`Generator`] sends one chat request per chunk: the system
//! instructions as the system turn, and the retrieved reference context plus
//! the chunk as the user turn (see [`user_message`]).
//!
//! Providers mirror [`crate::embedding`]: OpenAI and Azure OpenAI chat
//! completions share [`OpenAiGenerator`], a local Ollama uses
//! [`OllamaGenerator`], and `"disabled"` yields [`DisabledGenerator`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use compliance_harness_core::service::Generator;
use compliance_harness_core::Error;

use crate::config::GenerationConfig;
use crate::remote::{base_url, build_client, post_json, require_env};

/// Built-in system instructions, used unless `generation.system_prompt_path`
/// is set.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../prompts/system.txt");

/// Resolve the system instructions for a deployment.
pub fn system_instructions(config: &GenerationConfig) -> Result<String> {
    match &config.system_prompt_path {
        Some(path) => read_prompt(path),
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}

fn read_prompt(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read system prompt: {}", path.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("System prompt file is empty: {}", path.display());
    }
    Ok(text)
}

/// Format the user turn for one chunk.
pub fn user_message(reference_context: &str, chunk_text: &str) -> String {
    format!(
        "The relevant compliance context from the rules: {}\n\nHere is the paragraph to check: {}",
        reference_context, chunk_text
    )
}

fn chat_messages(
    system_instructions: &str,
    reference_context: &str,
    chunk_text: &str,
) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": system_instructions },
        { "role": "user", "content": user_message(reference_context, chunk_text) },
    ])
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _system_instructions: &str,
        _reference_context: &str,
        _chunk_text: &str,
    ) -> compliance_harness_core::Result<String> {
        Err(Error::GenerationService(
            "generation provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI / Azure OpenAI ============

/// Chat completions client for OpenAI and Azure OpenAI deployments.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    model: String,
    max_retries: u32,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    service: &'static str,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, pool_size: usize) -> Result<Self> {
        let model = required_model(config)?;
        let api_key = require_env("OPENAI_API_KEY")?;
        let base = config.url.as_deref().unwrap_or("https://api.openai.com");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))?,
        );

        Ok(Self {
            client: build_client(config.timeout(), pool_size)?,
            endpoint: format!("{}/v1/chat/completions", base_url(base)),
            headers,
            model,
            max_retries: config.max_retries,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            service: "OpenAI",
        })
    }

    pub fn azure(config: &GenerationConfig, pool_size: usize) -> Result<Self> {
        let model = required_model(config)?;
        let api_key = require_env("AZURE_OPENAI_API_KEY")?;
        let endpoint = match &config.url {
            Some(url) => url.clone(),
            None => require_env("AZURE_OPENAI_ENDPOINT")?,
        };

        let mut headers = HeaderMap::new();
        headers.insert("api-key", HeaderValue::from_str(&api_key)?);

        Ok(Self {
            client: build_client(config.timeout(), pool_size)?,
            endpoint: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base_url(&endpoint),
                model,
                config.api_version
            ),
            headers,
            model,
            max_retries: config.max_retries,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            service: "Azure OpenAI",
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_instructions: &str,
        reference_context: &str,
        chunk_text: &str,
    ) -> compliance_harness_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_instructions, reference_context, chunk_text),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "stream": false,
        });
        let json = post_json(
            &self.client,
            &self.endpoint,
            self.headers.clone(),
            &body,
            self.max_retries,
            self.service,
        )
        .await
        .map_err(Error::GenerationService)?;

        parse_chat_completion(&json).map_err(Error::GenerationService)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_completion(json: &serde_json::Value) -> Result<String, String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| "invalid response: missing choices[0].message.content".to_string())
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig, pool_size: usize) -> Result<Self> {
        let model = required_model(config)?;
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        Ok(Self {
            client: build_client(config.timeout(), pool_size)?,
            endpoint: format!("{}/api/chat", base_url(base)),
            model,
            max_retries: config.max_retries,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_instructions: &str,
        reference_context: &str,
        chunk_text: &str,
    ) -> compliance_harness_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_instructions, reference_context, chunk_text),
            "stream": false,
            "options": {
                "num_predict": self.max_tokens,
                "temperature": self.temperature,
                "top_p": self.top_p,
            },
        });
        let json = post_json(
            &self.client,
            &self.endpoint,
            HeaderMap::new(),
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(Error::GenerationService)?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::GenerationService(
                    "invalid Ollama response: missing message.content".to_string(),
                )
            })
    }
}

fn required_model(config: &GenerationConfig) -> Result<String> {
    config
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("generation.model required for {} provider", config.provider)
        })
}

/// Create the [`Generator`] named by `config.provider`.
pub fn create_generator(config: &GenerationConfig, pool_size: usize) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config, pool_size)?)),
        "azure" => Ok(Arc::new(OpenAiGenerator::azure(config, pool_size)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config, pool_size)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}
