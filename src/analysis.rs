//! Concurrent per-chunk analysis.
//!
//! Each chunk runs the same pipeline:
//!
//! ```text
//! chunk text ──► embed ──► normalize ──► corpus search (top k)
//!                                              │
//!                 finding ◄── generate ◄── reference context
//! ```
//!
//! # Scheduling
//!
//! One tokio task per chunk; each acquires a permit from a shared
//! [`Semaphore`] sized to the requested concurrency before starting, so at
//! most `concurrency` pipelines are in flight and the rest queue. Tasks hand
//! `(slot, outcome)` back to the single collector, which writes into a result
//! vector preallocated to the chunk count. Output order is input order no
//! matter which pipeline finishes first.
//!
//! # Failures
//!
//! A failing chunk yields an [`AnalysisResult`] whose finding is an error
//! marker; its siblings keep going. Only batch-fatal errors (see
//! [`Error::is_batch_fatal`]) abort the remaining tasks and fail the call.
//! Every embedding and generation call is bounded by its own timeout. With
//! retries enabled the bound covers all attempts and the backoff between
//! them (see [`crate::remote::call_budget`]).
//!
//! # Cancellation
//!
//! [`AnalysisContext::analyze_with`] accepts a `watch` channel. Once it reads
//! `true`, queued pipelines finish immediately with a `cancelled` marker and
//! in-flight ones run to completion. Dropping the returned future drops the
//! [`JoinSet`], which aborts every task.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use compliance_harness_core::chunk::{ChunkerSettings, SemanticChunker};
use compliance_harness_core::corpus::{reference_context, CorpusIndex};
use compliance_harness_core::models::{AnalysisResult, Chunk, Finding};
use compliance_harness_core::service::{Embedder, Generator};
use compliance_harness_core::vector::normalize;
use compliance_harness_core::{Error, Result};

use crate::config::Config;
use crate::corpus::load_or_build;
use crate::embedding::create_embedder;
use crate::generation::{create_generator, system_instructions, DEFAULT_SYSTEM_PROMPT};
use crate::progress::{AnalysisProgressEvent, AnalysisProgressReporter, NoProgress};

/// Per-deployment knobs for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub top_k: usize,
    pub concurrency: usize,
    pub min_chunk_chars: usize,
    pub chunker: ChunkerSettings,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub system_instructions: Arc<str>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            top_k: 15,
            concurrency: 32,
            min_chunk_chars: 55,
            chunker: ChunkerSettings::default(),
            embed_timeout: Duration::from_secs(30),
            generate_timeout: Duration::from_secs(120),
            system_instructions: Arc::from(DEFAULT_SYSTEM_PROMPT),
        }
    }
}

impl AnalysisSettings {
    /// Settings for `config`, reading the system prompt override if one is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            top_k: config.corpus.top_k,
            concurrency: config.analysis.concurrency,
            min_chunk_chars: config.chunking.min_chunk_chars,
            chunker: config.chunking.settings(),
            embed_timeout: config.embedding.call_budget(),
            generate_timeout: config.generation.call_budget(),
            system_instructions: Arc::from(system_instructions(&config.generation)?),
        })
    }
}

/// Everything a request needs: the shared corpus index, the service
/// clients, and the settings. Built once at startup and cloned cheaply into
/// each pipeline task.
#[derive(Clone)]
pub struct AnalysisContext {
    index: Arc<CorpusIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    chunker: SemanticChunker,
    settings: Arc<AnalysisSettings>,
}

impl AnalysisContext {
    pub fn new(
        index: Arc<CorpusIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: AnalysisSettings,
    ) -> Self {
        let chunker = SemanticChunker::new(embedder.clone(), settings.chunker.clone());
        Self {
            index,
            embedder,
            generator,
            chunker,
            settings: Arc::new(settings),
        }
    }

    /// Load the corpus and create the service clients named in `config`.
    ///
    /// Relative corpus and prompt paths resolve against the working
    /// directory.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (index, source) =
            load_or_build(&config.corpus.snapshot_path, &config.corpus.records_path)
                .context("Failed to load corpus index")?;
        tracing::debug!(?source, key = %index.key_hex(), "corpus ready");

        let pool_size = config.analysis.concurrency;
        let embedder = create_embedder(&config.embedding, pool_size)?;
        let generator = create_generator(&config.generation, pool_size)?;

        let settings = AnalysisSettings::from_config(config)?;

        tracing::info!(
            entries = index.len(),
            embedding_model = embedder.model_name(),
            generation_model = generator.model_name(),
            "analysis context ready"
        );

        Ok(Self::new(Arc::new(index), embedder, generator, settings))
    }

    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Split `text` with the configured minimum chunk size.
    pub async fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        self.chunker.chunk(text, self.settings.min_chunk_chars).await
    }

    /// Chunk `text` and analyze every chunk at the configured concurrency.
    pub async fn analyze_text(&self, text: &str) -> Result<Vec<AnalysisResult>> {
        let chunks = self.chunk(text).await?;
        self.analyze(chunks, self.settings.concurrency).await
    }

    /// Analyze `chunks` with at most `concurrency` pipelines in flight.
    pub async fn analyze(
        &self,
        chunks: Vec<Chunk>,
        concurrency: usize,
    ) -> Result<Vec<AnalysisResult>> {
        self.analyze_with(chunks, concurrency, &NoProgress, None).await
    }

    /// [`analyze`](Self::analyze) with progress events and an optional
    /// cancellation signal.
    pub async fn analyze_with(
        &self,
        chunks: Vec<Chunk>,
        concurrency: usize,
        progress: &dyn AnalysisProgressReporter,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<AnalysisResult>> {
        let total = chunks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let chunks: Arc<[Chunk]> = chunks.into();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for slot in 0..total {
            let ctx = self.clone();
            let chunks = chunks.clone();
            let semaphore = semaphore.clone();
            let mut cancel = cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(cancel.as_mut()) => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (slot, Err(Error::Cancelled));
                };
                // Cancelled while waiting for the permit
                if cancel.as_ref().is_some_and(|c| *c.borrow()) {
                    return (slot, Err(Error::Cancelled));
                }
                let outcome = ctx.run_pipeline(&chunks[slot].text).await;
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<AnalysisResult>> = (0..total).map(|_| None).collect();
        let mut done = 0usize;
        let mut failed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let (slot, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    // The slot keeps its `internal` marker
                    tracing::error!(error = %e, "analysis task did not complete");
                    done += 1;
                    failed += 1;
                    progress.report(AnalysisProgressEvent::Analyzed { n: done, total, failed });
                    continue;
                }
            };

            if let Err(err) = &outcome {
                if err.is_batch_fatal() {
                    tasks.abort_all();
                    tracing::error!(chunk = slot, error = %err, "analysis batch aborted");
                    return Err(err.clone());
                }
                failed += 1;
                tracing::warn!(
                    chunk = slot,
                    kind = err.kind(),
                    error = %err,
                    "chunk analysis failed"
                );
            }

            slots[slot] = Some(AnalysisResult::from_outcome(&chunks[slot], outcome));
            done += 1;
            progress.report(AnalysisProgressEvent::Analyzed { n: done, total, failed });
        }

        let results: Vec<AnalysisResult> = slots
            .into_iter()
            .enumerate()
            .map(|(slot, result)| {
                result.unwrap_or_else(|| AnalysisResult {
                    chunk_index: chunks[slot].index,
                    chunk_text: chunks[slot].text.clone(),
                    finding: Finding::Error {
                        kind: "internal".to_string(),
                        message: "analysis task panicked".to_string(),
                    },
                })
            })
            .collect();

        tracing::info!(
            chunks = total,
            failed = results.iter().filter(|r| r.finding.is_error()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis batch complete"
        );
        Ok(results)
    }

    async fn run_pipeline(&self, chunk_text: &str) -> Result<String> {
        let embedding = self.embedder.embed(chunk_text);
        let raw = tokio::time::timeout(self.settings.embed_timeout, embedding)
            .await
            .map_err(|_| {
                Error::EmbeddingService(format!(
                    "timed out after {}s",
                    self.settings.embed_timeout.as_secs_f64()
                ))
            })??;

        let query = normalize(raw)?;
        let hits = self.index.search(&query, self.settings.top_k)?;
        let context = reference_context(&hits);

        tokio::time::timeout(
            self.settings.generate_timeout,
            self.generator
                .generate(&self.settings.system_instructions, &context, chunk_text),
        )
        .await
        .map_err(|_| {
            Error::GenerationService(format!(
                "timed out after {}s",
                self.settings.generate_timeout.as_secs_f64()
            ))
        })?
    }
}

/// Resolve once `cancel` reads `true`; never resolves without a signal or
/// after the sender is dropped.
async fn cancelled(cancel: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|c| *c).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Read a document from disk and analyze it, reporting progress.
pub async fn analyze_file(
    ctx: &AnalysisContext,
    path: &Path,
    concurrency: usize,
    progress: &dyn AnalysisProgressReporter,
) -> anyhow::Result<Vec<AnalysisResult>> {
    let text = crate::extract::read_document(path)?;
    let chunks = ctx.chunk(&text).await?;
    progress.report(AnalysisProgressEvent::Chunked {
        chunks: chunks.len(),
    });
    Ok(ctx.analyze_with(chunks, concurrency, progress, None).await?)
}
