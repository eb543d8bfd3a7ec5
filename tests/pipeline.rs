//! Library-level tests of chunking and the concurrent analysis pipeline,
//! driven by in-process embedder and generator doubles.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use compliance_harness::progress::{AnalysisProgressEvent, AnalysisProgressReporter, NoProgress};
use compliance_harness_core::models::{Chunk, Finding};
use compliance_harness_core::service::Generator;
use compliance_harness_core::{Error, Result};

use common::{context_with, KeywordEmbedder, RecordingGenerator};

fn chunks(texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            index,
            text: text.to_string(),
        })
        .collect()
}

#[tokio::test]
async fn results_keep_input_order_when_latency_is_inverted() {
    // Earlier chunks take longer, so completion order is the reverse of input order
    let delays = (0..6)
        .map(|i| (format!("chunk {}", i), (6 - i) as u64 * 15))
        .collect();
    let embedder = Arc::new(KeywordEmbedder::with_delays(delays));
    let generator = Arc::new(RecordingGenerator::new());
    let ctx = context_with(embedder, generator, 2);

    let input = chunks(&["chunk 0", "chunk 1", "chunk 2", "chunk 3", "chunk 4", "chunk 5"]);
    let results = ctx.analyze(input, 2).await.unwrap();

    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.chunk_index, i);
        assert_eq!(result.chunk_text, format!("chunk {}", i));
        assert_eq!(
            result.finding,
            Finding::Ok {
                text: format!("reviewed: chunk {}", i)
            }
        );
    }
}

#[tokio::test]
async fn failure_is_isolated_to_its_chunk() {
    let generator = Arc::new(RecordingGenerator::new());
    let ctx = context_with(Arc::new(KeywordEmbedder::new()), generator.clone(), 2);

    let input = chunks(&["first", "second", "third FAIL", "fourth", "fifth"]);
    let results = ctx.analyze(input, 3).await.unwrap();

    assert_eq!(results.len(), 5);
    for (i, result) in results.iter().enumerate() {
        if i == 2 {
            match &result.finding {
                Finding::Error { kind, message } => {
                    assert_eq!(kind, "generation_service");
                    assert!(message.contains("model overloaded"));
                }
                other => panic!("chunk 2 should be an error marker, got {:?}", other),
            }
        } else {
            assert!(!result.finding.is_error(), "chunk {} failed", i);
        }
    }
    assert_eq!(generator.calls.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn concurrency_bounds_in_flight_pipelines() {
    let delays = vec![("slow".to_string(), 20)];
    let embedder = Arc::new(KeywordEmbedder::with_delays(delays));
    let ctx = context_with(embedder.clone(), Arc::new(RecordingGenerator::new()), 2);

    let texts: Vec<String> = (0..10).map(|i| format!("slow {}", i)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let results = ctx.analyze(chunks(&refs), 3).await.unwrap();

    assert_eq!(results.len(), 10);
    let peak = embedder.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn zero_concurrency_is_treated_as_one() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let ctx = context_with(embedder.clone(), Arc::new(RecordingGenerator::new()), 2);

    let results = ctx.analyze(chunks(&["a", "b", "c"]), 0).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(embedder.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_batch_returns_no_results() {
    let ctx = context_with(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingGenerator::new()),
        2,
    );
    assert!(ctx.analyze(Vec::new(), 4).await.unwrap().is_empty());
}

#[tokio::test]
async fn end_to_end_contexts_hold_at_most_k_references() {
    let generator = Arc::new(RecordingGenerator::new());
    let ctx = context_with(Arc::new(KeywordEmbedder::new()), generator.clone(), 2);

    let text = "Alpha rule one applies here in full. Alpha rule two applies here in full. \
                Beta rule three is different entirely. Beta rule four is different entirely.";
    let results = ctx.analyze_text(text).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].chunk_text.starts_with("Alpha rule one"));
    assert!(results[1].chunk_text.starts_with("Beta rule three"));

    let contexts = generator.contexts();
    assert_eq!(contexts.len(), 2);
    for context in &contexts {
        let refs = ["[R1]", "[R2]", "[R3]"]
            .iter()
            .filter(|r| context.contains(*r))
            .count();
        assert_eq!(refs, 2, "context: {}", context);
    }

    // The Alpha chunk retrieves the Alpha entry first
    let (alpha_context, _) = generator
        .calls
        .lock()
        .unwrap()
        .iter()
        .find(|(_, chunk)| chunk.starts_with("Alpha"))
        .cloned()
        .unwrap();
    assert!(alpha_context.starts_with("[R1]"), "{}", alpha_context);
}

#[tokio::test]
async fn chunking_empty_and_single_sentence() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let ctx = context_with(embedder.clone(), Arc::new(RecordingGenerator::new()), 2);

    assert!(ctx.chunk("").await.unwrap().is_empty());
    assert!(ctx.chunk("   \n\t ").await.unwrap().is_empty());

    let single = ctx.chunk("One short sentence.").await.unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].text, "One short sentence.");
    assert_eq!(single[0].index, 0);

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chunking_failure_is_reported_not_papered_over() {
    let embedder = Arc::new(KeywordEmbedder {
        fail_batches: true,
        ..KeywordEmbedder::default()
    });
    let ctx = context_with(embedder, Arc::new(RecordingGenerator::new()), 2);

    let err = ctx
        .analyze_text("First sentence here. Second sentence there.")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChunkingUnavailable(_)), "{:?}", err);
}

#[tokio::test]
async fn dimension_mismatch_fails_the_batch() {
    let embedder = Arc::new(KeywordEmbedder {
        dimension_override: Some(4),
        ..KeywordEmbedder::default()
    });
    let ctx = context_with(embedder, Arc::new(RecordingGenerator::new()), 2);

    let err = ctx.analyze(chunks(&["a", "b", "c"]), 2).await.unwrap_err();
    assert_eq!(
        err,
        Error::DimensionMismatch {
            expected: 3,
            actual: 4
        }
    );
}

/// Blocks every generation until released, announcing each start.
struct GatedGenerator {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Generator for GatedGenerator {
    fn model_name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _s: &str, _c: &str, chunk_text: &str) -> Result<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(format!("done: {}", chunk_text))
    }
}

#[tokio::test]
async fn cancellation_skips_queued_chunks_only() {
    let generator = Arc::new(GatedGenerator {
        started: Notify::new(),
        release: Notify::new(),
    });
    let ctx = context_with(Arc::new(KeywordEmbedder::new()), generator.clone(), 2);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        task_ctx
            .analyze_with(chunks(&["a", "b", "c", "d"]), 1, &NoProgress, Some(cancel_rx))
            .await
    });

    // One pipeline is in flight; the other three are queued
    generator.started.notified().await;
    cancel_tx.send(true).unwrap();
    generator.release.notify_one();

    let results = handle.await.unwrap().unwrap();
    assert_eq!(results.len(), 4);
    let completed = results.iter().filter(|r| !r.finding.is_error()).count();
    let cancelled = results
        .iter()
        .filter(|r| matches!(&r.finding, Finding::Error { kind, .. } if kind == "cancelled"))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(cancelled, 3);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.chunk_index, i);
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<AnalysisProgressEvent>>,
}

impl AnalysisProgressReporter for RecordingProgress {
    fn report(&self, event: AnalysisProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn progress_counts_completed_and_failed_chunks() {
    let ctx = context_with(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingGenerator::new()),
        2,
    );
    let progress = RecordingProgress::default();

    ctx.analyze_with(chunks(&["ok", "FAIL", "ok again"]), 2, &progress, None)
        .await
        .unwrap();

    let events = progress.events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.last(),
        Some(&AnalysisProgressEvent::Analyzed {
            n: 3,
            total: 3,
            failed: 1
        })
    );
}
