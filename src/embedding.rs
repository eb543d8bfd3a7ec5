//! Embedding service clients.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when `embedding.provider = "disabled"`.
//! - **[`OpenAiEmbedder`]**: OpenAI `POST /v1/embeddings`, or the Azure OpenAI
//!   deployment endpoint (same request and response shape, different URL and
//!   auth header).
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `POST /api/embed`.
//!
//! Batch calls are split into requests of at most `embedding.batch_size`
//! inputs, sent one after another; the vectors come back in input order.
//!
//! Use [`create_embedder`] to instantiate the provider named in the config.
//!
//! ```rust
//! # use compliance_harness::config::EmbeddingConfig;
//! # use compliance_harness::embedding::create_embedder;
//! # use compliance_harness_core::service::Embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config, 32).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use compliance_harness_core::service::{count_mismatch, Embedder};
use compliance_harness_core::Error;

use crate::config::EmbeddingConfig;
use crate::remote::{base_url, build_client, post_json, require_env};

// ============ Disabled ============

/// Embedder that rejects every call.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> compliance_harness_core::Result<Vec<f64>> {
        Err(Error::EmbeddingService(
            "embedding provider is disabled".to_string(),
        ))
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
    ) -> compliance_harness_core::Result<Vec<Vec<f64>>> {
        Err(Error::EmbeddingService(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI / Azure OpenAI ============

/// Client for the OpenAI embeddings API and Azure OpenAI deployments.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    model: String,
    max_retries: u32,
    batch_size: usize,
    service: &'static str,
}

impl OpenAiEmbedder {
    /// OpenAI (or a compatible gateway at `embedding.url`). Requires `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig, pool_size: usize) -> Result<Self> {
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
            endpoint: format!("{}/v1/embeddings", base_url(base)),
            headers,
            model,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
            service: "OpenAI",
        })
    }

    /// Azure OpenAI. The model name is the deployment name. Requires
    /// `AZURE_OPENAI_API_KEY`, and `AZURE_OPENAI_ENDPOINT` unless
    /// `embedding.url` is set.
    pub fn azure(config: &EmbeddingConfig, pool_size: usize) -> Result<Self> {
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
                "{}/openai/deployments/{}/embeddings?api-version={}",
                base_url(&endpoint),
                model,
                config.api_version
            ),
            headers,
            model,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
            service: "Azure OpenAI",
        })
    }

    async fn request(
        &self,
        input: serde_json::Value,
        expected: usize,
    ) -> compliance_harness_core::Result<Vec<Vec<f64>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
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
        .map_err(Error::EmbeddingService)?;

        let vectors = parse_openai_response(&json).map_err(Error::EmbeddingService)?;
        if vectors.len() != expected {
            return Err(count_mismatch(expected, vectors.len()));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> compliance_harness_core::Result<Vec<f64>> {
        let mut vectors = self.request(serde_json::json!(text), 1).await?;
        vectors
            .pop()
            .ok_or_else(|| count_mismatch(1, 0))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> compliance_harness_core::Result<Vec<Vec<f64>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.request(serde_json::json!(batch), batch.len()).await?);
        }
        Ok(vectors)
    }
}

/// Parse an OpenAI embeddings response.
///
/// Extracts `data[].embedding` and orders the vectors by their `index`
/// field when present, so the output matches the input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f64>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "invalid response: missing data array".to_string())?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| "invalid response: missing embedding".to_string())?;
        indexed.push((index, to_f64_vec(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Client for a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, pool_size: usize) -> Result<Self> {
        let model = required_model(config)?;
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        Ok(Self {
            client: build_client(config.timeout(), pool_size)?,
            endpoint: format!("{}/api/embed", base_url(base)),
            model,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn request(
        &self,
        batch: &[String],
    ) -> compliance_harness_core::Result<Vec<Vec<f64>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
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
        .map_err(Error::EmbeddingService)?;

        let vectors = parse_ollama_response(&json).map_err(Error::EmbeddingService)?;
        if vectors.len() != batch.len() {
            return Err(count_mismatch(batch.len(), vectors.len()));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> compliance_harness_core::Result<Vec<f64>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| count_mismatch(1, 0))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> compliance_harness_core::Result<Vec<Vec<f64>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.request(batch).await?);
        }
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f64>>, String> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| "invalid Ollama response: missing embeddings array".to_string())?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .ok_or_else(|| "invalid Ollama response: embedding is not an array".to_string())
                .and_then(|a| to_f64_vec(a))
        })
        .collect()
}

// ============ Helpers ============

fn to_f64_vec(values: &[serde_json::Value]) -> Result<Vec<f64>, String> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| "invalid response: non-numeric embedding value".to_string())
        })
        .collect()
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", config.provider))
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder::new`] |
/// | `"azure"` | [`OpenAiEmbedder::azure`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
///
/// `pool_size` should be at least the analysis concurrency.
pub fn create_embedder(config: &EmbeddingConfig, pool_size: usize) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config, pool_size)?)),
        "azure" => Ok(Arc::new(OpenAiEmbedder::azure(config, pool_size)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, pool_size)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::routing::post;
    use axum::{Json, Router};

    use crate::remote::testing::serve;

    /// Embedding endpoint that records each request's input count and
    /// embeds `"s<n>"` as `[n, 1]`. OpenAI-style responses list the items
    /// in reverse with their `index`.
    async fn embeddings_server(requests: Arc<Mutex<Vec<usize>>>) -> String {
        fn vector(input: &serde_json::Value) -> Vec<f64> {
            let n: f64 = input.as_str().unwrap()[1..].parse().unwrap();
            vec![n, 1.0]
        }
        fn inputs(body: &serde_json::Value) -> Vec<serde_json::Value> {
            match &body["input"] {
                serde_json::Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            }
        }

        let openai_log = requests.clone();
        let ollama_log = requests;
        let app = Router::new()
            .route(
                "/v1/embeddings",
                post(move |Json(body): Json<serde_json::Value>| {
                    let log = openai_log.clone();
                    async move {
                        let items = inputs(&body);
                        log.lock().unwrap().push(items.len());
                        let data: Vec<serde_json::Value> = items
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(i, input)| {
                                serde_json::json!({ "index": i, "embedding": vector(input) })
                            })
                            .collect();
                        Json(serde_json::json!({ "data": data }))
                    }
                }),
            )
            .route(
                "/api/embed",
                post(move |Json(body): Json<serde_json::Value>| {
                    let log = ollama_log.clone();
                    async move {
                        let items = inputs(&body);
                        log.lock().unwrap().push(items.len());
                        let embeddings: Vec<Vec<f64>> = items.iter().map(vector).collect();
                        Json(serde_json::json!({ "embeddings": embeddings }))
                    }
                }),
            );
        serve(app).await
    }

    fn sentences(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{}", i)).collect()
    }

    #[tokio::test]
    async fn ollama_batches_are_split_and_kept_in_order() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = embeddings_server(requests.clone()).await;
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            url: Some(base),
            batch_size: 4,
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config, 2).unwrap();

        let vectors = embedder.embed_batch(&sentences(10)).await.unwrap();
        assert_eq!(*requests.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(vectors.len(), 10);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f64);
        }
    }

    #[tokio::test]
    async fn openai_large_batch_stays_under_request_limit() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = embeddings_server(requests.clone()).await;
        let embedder = OpenAiEmbedder {
            client: build_client(std::time::Duration::from_secs(10), 2).unwrap(),
            endpoint: format!("{}/v1/embeddings", base),
            headers: HeaderMap::new(),
            model: "text-embedding-ada-002".to_string(),
            max_retries: 0,
            batch_size: crate::config::MAX_EMBEDDING_BATCH,
            service: "OpenAI",
        };

        let vectors = embedder.embed_batch(&sentences(3000)).await.unwrap();
        assert_eq!(*requests.lock().unwrap(), vec![2048, 952]);
        assert_eq!(vectors.len(), 3000);
        assert_eq!(vectors[2048], vec![2048.0, 1.0]);
        assert_eq!(vectors[2999], vec![2999.0, 1.0]);
    }

    #[tokio::test]
    async fn empty_batch_sends_no_request() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let base = embeddings_server(requests.clone()).await;
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            url: Some(base),
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config, 2).unwrap();

        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_fails() {
        let json = serde_json::json!({ "error": { "message": "quota" } });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn openai_response_rejects_non_numeric_values() {
        let json = serde_json::json!({ "data": [ { "embedding": [1.0, "x"] } ] });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn ollama_response_parses() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5], [1.0, 2.0]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn disabled_embedder_fails_with_service_error() {
        let err = DisabledEmbedder.embed("text").await.unwrap_err();
        assert_eq!(err.kind(), "embedding_service");
    }

    #[test]
    fn create_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "cohere".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config, 4).is_err());
    }

    #[test]
    fn ollama_needs_no_credentials() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            url: Some("http://localhost:11434/".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config, 4).unwrap();
        assert_eq!(embedder.model_name(), "nomic-embed-text");
    }
}
