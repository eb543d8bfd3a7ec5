//! Semantic text chunker.
//!
//! Splits extracted document text into ordered [`Chunk`]s whose boundaries
//! fall where the topic shifts, as measured by embedding distance between
//! neighbouring sentences.
//!
//! # Algorithm
//!
//! 1. Split the text into sentences (a `.`, `?` or `!` followed by whitespace).
//! 2. Widen each sentence into a window with `buffer_size` neighbours on each
//!    side and embed all windows in one batch.
//! 3. Compute the cosine distance between each pair of adjacent windows. A
//!    breakpoint follows every sentence whose distance is strictly above the
//!    configured percentile of all distances.
//! 4. Merge: walking left to right once, a segment shorter than
//!    `min_chunk_chars` (trimmed, in characters) is appended to the previous
//!    chunk with a single space. The first segment is always kept.
//! 5. Line breaks inside a chunk become single spaces.
//!
//! Text with a single sentence is returned as one chunk without any
//! embedding call. When the breakpoint embeddings cannot be obtained the
//! chunker fails with [`Error::ChunkingUnavailable`] rather than falling
//! back to a naive split.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::service::Embedder;
use crate::vector::{dot, normalize, EmbeddingVector};

/// Breakpoint tuning, independent of the application config format.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkerSettings {
    /// Percentile (0–100) of adjacent distances above which a breakpoint is placed.
    pub breakpoint_percentile: f64,
    /// Neighbouring sentences on each side included in a sentence's window.
    pub buffer_size: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            breakpoint_percentile: 88.0,
            buffer_size: 1,
        }
    }
}

/// Embedding-driven chunker. Cheap to clone; shares its embedder.
#[derive(Clone)]
pub struct SemanticChunker {
    embedder: Arc<dyn Embedder>,
    settings: ChunkerSettings,
}

impl SemanticChunker {
    pub fn new(embedder: Arc<dyn Embedder>, settings: ChunkerSettings) -> Self {
        Self { embedder, settings }
    }

    pub fn settings(&self) -> &ChunkerSettings {
        &self.settings
    }

    /// Split `text` into ordered chunks.
    ///
    /// Returns an empty vector for empty or whitespace-only input.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkingUnavailable`] if the sentence-window embeddings fail,
    /// come back with the wrong count, or contain a zero vector.
    pub async fn chunk(&self, text: &str, min_chunk_chars: usize) -> Result<Vec<Chunk>> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let segments = if sentences.len() == 1 {
            vec![sentences[0].to_string()]
        } else {
            let windows = combine_with_neighbors(&sentences, self.settings.buffer_size);
            let vectors = self.embed_windows(&windows).await?;
            let distances = adjacent_distances(&vectors);
            let cuts = breakpoints(&distances, self.settings.breakpoint_percentile);
            split_at_breakpoints(&sentences, &cuts)
        };

        Ok(into_chunks(merge_undersized(segments, min_chunk_chars)))
    }

    async fn embed_windows(&self, windows: &[String]) -> Result<Vec<EmbeddingVector>> {
        let raw = self
            .embedder
            .embed_batch(windows)
            .await
            .map_err(|e| Error::ChunkingUnavailable(e.to_string()))?;
        if raw.len() != windows.len() {
            return Err(Error::ChunkingUnavailable(format!(
                "expected {} sentence embeddings, got {}",
                windows.len(),
                raw.len()
            )));
        }

        let dimension = raw.first().map(Vec::len).unwrap_or(0);
        let mut vectors = Vec::with_capacity(raw.len());
        for (i, v) in raw.into_iter().enumerate() {
            if v.len() != dimension {
                return Err(Error::ChunkingUnavailable(format!(
                    "sentence embedding {} has dimension {}, expected {}",
                    i,
                    v.len(),
                    dimension
                )));
            }
            let unit = normalize(v).map_err(|_| {
                Error::ChunkingUnavailable(format!("sentence embedding {} is degenerate", i))
            })?;
            vectors.push(unit);
        }
        Ok(vectors)
    }
}

/// Split text into trimmed, non-empty sentences.
///
/// A sentence ends at `.`, `?` or `!` immediately followed by whitespace;
/// the whitespace run is dropped. Text after the last terminator forms the
/// final sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        let followed_by_space = chars.peek().map(|&(_, n)| n.is_whitespace()).unwrap_or(false);
        if !followed_by_space {
            continue;
        }
        push_trimmed(&mut out, &text[start..i + c.len_utf8()]);
        start = text.len();
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                start = j;
                break;
            }
            chars.next();
        }
    }
    if start < text.len() {
        push_trimmed(&mut out, &text[start..]);
    }
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let t = s.trim();
    if !t.is_empty() {
        out.push(t);
    }
}

/// Widen each sentence with up to `buffer` neighbours on either side.
pub fn combine_with_neighbors(sentences: &[&str], buffer: usize) -> Vec<String> {
    let n = sentences.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(buffer);
            let hi = (i + buffer).min(n.saturating_sub(1));
            sentences[lo..=hi].join(" ")
        })
        .collect()
}

/// Cosine distance (`1 - similarity`) between each pair of adjacent vectors.
pub fn adjacent_distances(vectors: &[EmbeddingVector]) -> Vec<f64> {
    vectors
        .windows(2)
        .map(|w| 1.0 - dot(w[0].values(), w[1].values()))
        .collect()
}

/// The `p`-th percentile (0–100) of `values`, linearly interpolated
/// between the closest ranks. Returns `0.0` for no values.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Indices `i` whose distance to sentence `i + 1` exceeds the `p`-th percentile.
pub fn breakpoints(distances: &[f64], p: f64) -> Vec<usize> {
    let threshold = percentile(distances, p);
    distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Join sentences into segments, cutting after each breakpoint index.
pub fn split_at_breakpoints(sentences: &[&str], cuts: &[usize]) -> Vec<String> {
    let mut segments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        if cut < start || cut >= sentences.len() {
            continue;
        }
        segments.push(sentences[start..=cut].join(" "));
        start = cut + 1;
    }
    if start < sentences.len() {
        segments.push(sentences[start..].join(" "));
    }
    segments
}

/// Single left-to-right pass appending undersized segments to their predecessor.
pub fn merge_undersized(segments: Vec<String>, min_chunk_chars: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(segments.len());
    for segment in segments {
        let content = segment.trim();
        if content.is_empty() {
            continue;
        }
        if content.chars().count() < min_chunk_chars {
            if let Some(prev) = merged.last_mut() {
                prev.push(' ');
                prev.push_str(content);
                continue;
            }
        }
        merged.push(content.to_string());
    }
    merged
}

/// Number the merged segments and flatten their line breaks.
fn into_chunks(segments: Vec<String>) -> Vec<Chunk> {
    segments
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            index,
            text: flatten_line_breaks(&text),
        })
        .collect()
}

fn flatten_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn split_sentences_basic() {
        let s = split_sentences("First one. Second one?  Third!\nFourth");
        assert_eq!(s, vec!["First one.", "Second one?", "Third!", "Fourth"]);
    }

    #[test]
    fn split_sentences_keeps_inline_periods() {
        let s = split_sentences("Version 2.5 ships today. See e.g.the notes.");
        assert_eq!(s, vec!["Version 2.5 ships today.", "See e.g.the notes."]);
    }

    #[test]
    fn split_sentences_empty_and_blank() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n\t ").is_empty());
    }

    #[test]
    fn split_sentences_trailing_terminator() {
        assert_eq!(split_sentences("Only one.  "), vec!["Only one."]);
    }

    #[test]
    fn combine_windows() {
        let w = combine_with_neighbors(&["a.", "b.", "c."], 1);
        assert_eq!(w, vec!["a. b.", "a. b. c.", "b. c."]);
        let w0 = combine_with_neighbors(&["a.", "b."], 0);
        assert_eq!(w0, vec!["a.", "b."]);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 88.0) - 3.64).abs() < 1e-12);
        assert_eq!(percentile(&[], 88.0), 0.0);
        assert_eq!(percentile(&[0.3], 88.0), 0.3);
    }

    #[test]
    fn breakpoints_strictly_above_threshold() {
        let d = [0.1, 0.1, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        assert_eq!(breakpoints(&d, 88.0), vec![2]);
        // All equal: nothing exceeds the threshold.
        assert!(breakpoints(&[0.2, 0.2, 0.2], 88.0).is_empty());
    }

    #[test]
    fn split_at_breakpoints_groups_sentences() {
        let s = ["a.", "b.", "c.", "d."];
        assert_eq!(split_at_breakpoints(&s, &[1]), vec!["a. b.", "c. d."]);
        assert_eq!(split_at_breakpoints(&s, &[]), vec!["a. b. c. d."]);
        assert_eq!(split_at_breakpoints(&s, &[3]), vec!["a. b. c. d."]);
        assert_eq!(
            split_at_breakpoints(&s, &[0, 2]),
            vec!["a.", "b. c.", "d."]
        );
    }

    #[test]
    fn merge_appends_short_segments_to_previous() {
        let segs = vec![
            "Short.".to_string(),
            "This segment is comfortably longer than the threshold.".to_string(),
            "Tiny.".to_string(),
            "Also tiny.".to_string(),
            "Another segment that is long enough to stand alone.".to_string(),
        ];
        let merged = merge_undersized(segs, 20);
        assert_eq!(
            merged,
            vec![
                "Short.".to_string(),
                "This segment is comfortably longer than the threshold. Tiny. Also tiny."
                    .to_string(),
                "Another segment that is long enough to stand alone.".to_string(),
            ]
        );
    }

    #[test]
    fn merge_keeps_first_segment_even_if_short() {
        let merged = merge_undersized(vec!["a".into(), "b".into()], 55);
        assert_eq!(merged, vec!["a b".to_string()]);
    }

    #[test]
    fn merge_equal_length_runs_terminate() {
        let segs: Vec<String> = (0..1000).map(|_| "xx".to_string()).collect();
        let merged = merge_undersized(segs, 3);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].len(), 1000 * 3 - 1);
    }

    #[test]
    fn merge_never_drops_characters() {
        let segs: Vec<String> = vec![
            "  Alpha beta gamma.  ",
            "d.",
            "\nEpsilon zeta eta theta iota kappa.",
            "λ μ.",
            "Nu xi omicron pi rho sigma tau upsilon.",
            " ",
            "phi",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let expected: String = segs.iter().map(|s| non_ws(s)).collect();
        for min in [0, 1, 5, 20, 55, 500] {
            let merged = merge_undersized(segs.clone(), min);
            let actual: String = merged.iter().map(|s| non_ws(s)).collect();
            assert_eq!(actual, expected, "min_chunk_chars = {}", min);
            assert!(merged.iter().all(|m| !m.trim().is_empty()));
        }
    }

    #[test]
    fn merge_counts_characters_not_bytes() {
        // 4 chars, 8 bytes
        let merged = merge_undersized(vec!["first".into(), "éééé".into()], 5);
        assert_eq!(merged, vec!["first éééé".to_string()]);
        let kept = merge_undersized(vec!["first".into(), "ééééé".into()], 5);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn into_chunks_numbers_and_flattens() {
        let chunks = into_chunks(vec!["line one\nline two".into(), "a\r\nb".into()]);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "line one line two");
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].text, "a b");
    }
}
