//! In-process service doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use compliance_harness::analysis::{AnalysisContext, AnalysisSettings};
use compliance_harness_core::corpus::CorpusIndex;
use compliance_harness_core::models::CorpusRecord;
use compliance_harness_core::service::{Embedder, Generator};
use compliance_harness_core::{Error, Result};

/// Embeds text as `[count("Alpha"), count("Beta"), 0.1]`.
///
/// Texts containing a key of `delays` sleep for that many milliseconds first.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub delays: Vec<(String, u64)>,
    pub dimension_override: Option<usize>,
    pub fail_batches: bool,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delays(delays: Vec<(String, u64)>) -> Self {
        Self {
            delays,
            ..Self::default()
        }
    }

    fn vector(&self, text: &str) -> Vec<f64> {
        let mut v = vec![
            text.matches("Alpha").count() as f64,
            text.matches("Beta").count() as f64,
            0.1,
        ];
        if let Some(d) = self.dimension_override {
            v.resize(d, 0.5);
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-mock"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, ms)| *ms);
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches {
            return Err(Error::EmbeddingService("connection refused".into()));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Records every call and answers `reviewed: <chunk>`. Chunks containing
/// `FAIL` produce a generation error.
#[derive(Default)]
pub struct RecordingGenerator {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording-mock"
    }

    async fn generate(
        &self,
        _system_instructions: &str,
        reference_context: &str,
        chunk_text: &str,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((reference_context.to_string(), chunk_text.to_string()));
        if chunk_text.contains("FAIL") {
            return Err(Error::GenerationService("model overloaded".into()));
        }
        Ok(format!("reviewed: {}", chunk_text))
    }
}

pub fn record(embedding: Vec<f64>, text: &str) -> CorpusRecord {
    CorpusRecord {
        embedding,
        summary: String::new(),
        reference_text: text.to_string(),
        source_file: "guide.pdf".to_string(),
    }
}

/// Three reference entries: one Alpha-like, one Beta-like, one in between.
pub fn sample_index() -> CorpusIndex {
    CorpusIndex::build(vec![
        record(vec![1.0, 0.0, 0.0], "[R1]"),
        record(vec![0.0, 1.0, 0.0], "[R2]"),
        record(vec![0.7, 0.7, 0.0], "[R3]"),
    ])
    .unwrap()
}

pub fn context_with(
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    top_k: usize,
) -> AnalysisContext {
    let settings = AnalysisSettings {
        top_k,
        ..AnalysisSettings::default()
    };
    AnalysisContext::new(Arc::new(sample_index()), embedder, generator, settings)
}
