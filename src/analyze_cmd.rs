//! `chk analyze`, `chk chunk` and `chk extract`.
//!
//! Results go to stdout; progress and logs go to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use compliance_harness_core::chunk::SemanticChunker;

use crate::analysis::{analyze_file, AnalysisContext};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::read_document;
use crate::progress::ProgressMode;

/// Analyze a document and print the ordered results as JSON.
pub async fn run_analyze(
    config: &Config,
    path: &Path,
    concurrency: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let ctx = AnalysisContext::from_config(config)?;
    let concurrency = concurrency.unwrap_or(config.analysis.concurrency);
    let reporter = progress.reporter();

    let results = analyze_file(&ctx, path, concurrency, reporter.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Chunk a document and print each chunk.
pub async fn run_chunk(config: &Config, path: &Path, min_chars: Option<usize>) -> Result<()> {
    let text = read_document(path)?;
    let embedder = create_embedder(&config.embedding, 1)?;
    let chunker = SemanticChunker::new(Arc::clone(&embedder), config.chunking.settings());
    let min_chars = min_chars.unwrap_or(config.chunking.min_chunk_chars);

    let chunks = chunker.chunk(&text, min_chars).await?;
    if chunks.is_empty() {
        println!("No chunks.");
        return Ok(());
    }
    for chunk in &chunks {
        println!("[{}] ({} chars)", chunk.index, chunk.text.chars().count());
        println!("    {}", chunk.text);
        println!();
    }
    Ok(())
}

/// Print the text extracted from a document.
pub fn run_extract(path: &Path) -> Result<()> {
    let text = read_document(path)?;
    println!("{}", text);
    Ok(())
}
