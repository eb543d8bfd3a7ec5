//! `chk corpus build | info | search`.

use anyhow::{Context, Result};

use compliance_harness_core::corpus::records_key;
use compliance_harness_core::service::Embedder;
use compliance_harness_core::vector::normalize;

use crate::config::Config;
use crate::corpus::{load_or_build, read_records, read_snapshot, rebuild, LoadSource};
use crate::embedding::create_embedder;

/// Build the snapshot from records. Without `force`, an up-to-date snapshot
/// is left alone.
pub fn run_build(config: &Config, force: bool) -> Result<()> {
    let corpus = &config.corpus;
    if force {
        let index = rebuild(&corpus.snapshot_path, &corpus.records_path)?;
        println!(
            "Rebuilt corpus index: {} entries, dimension {}",
            index.len(),
            index.dimension()
        );
        return Ok(());
    }

    let (index, source) = load_or_build(&corpus.snapshot_path, &corpus.records_path)?;
    let verb = match source {
        LoadSource::Snapshot => "Corpus index up to date",
        LoadSource::Built => "Built corpus index",
        LoadSource::Rebuilt => "Rebuilt stale corpus index",
    };
    println!(
        "{}: {} entries, dimension {}",
        verb,
        index.len(),
        index.dimension()
    );
    Ok(())
}

/// Describe the snapshot without building anything.
pub fn run_info(config: &Config) -> Result<()> {
    let corpus = &config.corpus;
    if !corpus.snapshot_path.exists() {
        println!("No snapshot at {}", corpus.snapshot_path.display());
        println!("Run `chk corpus build` to create it.");
        return Ok(());
    }

    let index = read_snapshot(&corpus.snapshot_path)?;
    println!("snapshot:  {}", corpus.snapshot_path.display());
    println!("entries:   {}", index.len());
    println!("dimension: {}", index.dimension());
    println!("key:       {}", index.key_hex());

    if corpus.records_path.exists() {
        let records = read_records(&corpus.records_path)?;
        let fresh = &records_key(&records) == index.key();
        println!("records:   {}", corpus.records_path.display());
        println!("status:    {}", if fresh { "up to date" } else { "stale" });
    }
    Ok(())
}

/// Embed `query` and print the `k` nearest corpus entries.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let corpus = &config.corpus;
    let (index, _) = load_or_build(&corpus.snapshot_path, &corpus.records_path)?;
    let embedder = create_embedder(&config.embedding, 1)?;

    let raw = embedder.embed(query).await.context("Failed to embed query")?;
    let query_vec = normalize(raw)?;
    let hits = index.search(&query_vec, k.unwrap_or(corpus.top_k))?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (entry {})",
            rank + 1,
            hit.score,
            if hit.entry.source_file.is_empty() {
                "-"
            } else {
                hit.entry.source_file.as_str()
            },
            hit.position
        );
        if !hit.entry.summary.is_empty() {
            println!("    summary: {}", hit.entry.summary);
        }
        println!("    > {}", preview(&hit.entry.reference_text, 200));
        println!();
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
