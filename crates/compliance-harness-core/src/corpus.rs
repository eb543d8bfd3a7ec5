//! Static reference corpus with exact top-k cosine search.
//!
//! A [`CorpusIndex`] is built once from [`CorpusRecord`]s (or decoded from a
//! snapshot, see [`crate::snapshot`]) and is read-only afterwards, so it can
//! be shared behind an `Arc` by any number of concurrent searches without
//! locking.
//!
//! # Search
//!
//! Search is a flat scan: every entry is scored by the dot product of its
//! unit embedding with the unit query. Results are ordered by descending
//! similarity; equal similarities keep insertion order, so identical
//! corpora always answer identically.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::CorpusRecord;
use crate::vector::{dot, normalize, EmbeddingVector};

/// One reference item of the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusEntry {
    pub embedding: EmbeddingVector,
    pub reference_text: String,
    pub source_file: String,
    pub summary: String,
}

/// A search hit: the entry, its insertion position, and its similarity.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub position: usize,
    pub score: f64,
    pub entry: &'a CorpusEntry,
}

/// Immutable searchable corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusIndex {
    entries: Vec<CorpusEntry>,
    dimension: usize,
    key: [u8; 32],
}

impl CorpusIndex {
    /// Build an index from raw records.
    ///
    /// Every embedding is normalized and must share the first record's
    /// dimension. The content key is the SHA-256 of the records' canonical
    /// JSON encoding, so identical records always yield identical indexes.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCorpus`] for zero records.
    /// - [`Error::DimensionMismatch`] when a record's dimension differs.
    /// - [`Error::DegenerateVector`] when a record's embedding has zero norm.
    pub fn build(records: Vec<CorpusRecord>) -> Result<Self> {
        let key = records_key(&records);
        Self::build_with_key(records, key)
    }

    pub(crate) fn build_with_key(records: Vec<CorpusRecord>, key: [u8; 32]) -> Result<Self> {
        let dimension = records
            .first()
            .map(|r| r.embedding.len())
            .ok_or(Error::EmptyCorpus)?;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: record.embedding.len(),
                });
            }
            entries.push(CorpusEntry {
                embedding: normalize(record.embedding)?,
                reference_text: record.reference_text,
                source_file: record.source_file,
                summary: record.summary,
            });
        }

        Ok(Self {
            entries,
            dimension,
            key,
        })
    }

    /// Assemble an index from already-normalized parts (snapshot decode).
    pub(crate) fn from_parts(
        entries: Vec<CorpusEntry>,
        dimension: usize,
        key: [u8; 32],
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        Ok(Self {
            entries,
            dimension,
            key,
        })
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Content key of the records this index was built from.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Hex form of [`key`](Self::key), for logs and `corpus info`.
    pub fn key_hex(&self) -> String {
        self.key.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Return the `min(k, len)` entries most similar to `query`.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] if `query` does not match the corpus
    /// dimension. `k == 0` is not an error and returns no hits.
    pub fn search(&self, query: &EmbeddingVector, k: usize) -> Result<Vec<SearchHit<'_>>> {
        if query.dimension() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let q = query.values();
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| SearchHit {
                position,
                score: dot(q, entry.embedding.values()),
                entry,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Concatenate the hits' reference texts, in hit order, into the context
/// string handed to the generation service.
pub fn reference_context(hits: &[SearchHit<'_>]) -> String {
    let mut out = String::new();
    for hit in hits {
        out.push_str(&hit.entry.reference_text);
    }
    out
}

/// SHA-256 over the canonical JSON encoding of `records`.
pub fn records_key(records: &[CorpusRecord]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    // Vec<f64>/String fields always serialize
    let encoded = serde_json::to_vec(records).unwrap_or_default();
    hasher.update(&encoded);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}
