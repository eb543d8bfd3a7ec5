//! Binary snapshot codec for [`CorpusIndex`].
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! ┌──────────┬─────────┬──────────────┬───────────┬─────────┐
//! │ CHKIDX01 │ version │ content key  │ dimension │  count  │
//! │ 8 bytes  │ u32     │ 32 bytes     │ u32       │ u32     │
//! ├──────────┴─────────┴──────────────┴───────────┴─────────┤
//! │ count × dimension f64 (unit-norm embeddings, row-major) │
//! ├─────────────────────────────────────────────────────────┤
//! │ JSON array of { summary, reference_text, source_file }  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Encoding is a pure function of the index, so an index rebuilt from the
//! same records produces a byte-identical snapshot.

use serde::{Deserialize, Serialize};

use crate::corpus::{CorpusEntry, CorpusIndex};
use crate::error::{Error, Result};
use crate::vector::{blob_to_vec, l2_norm, vec_to_blob, EmbeddingVector};

const MAGIC: &[u8; 8] = b"CHKIDX01";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 32 + 4 + 4;
/// Decoded embeddings must be unit-norm within this tolerance.
const NORM_TOLERANCE: f64 = 1e-6;

#[derive(Serialize, Deserialize)]
struct EntryMeta {
    summary: String,
    reference_text: String,
    source_file: String,
}

/// Serialize `index` into a snapshot blob.
pub fn encode(index: &CorpusIndex) -> Vec<u8> {
    let dims = index.dimension();
    let mut out = Vec::with_capacity(HEADER_LEN + index.len() * dims * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(index.key());
    out.extend_from_slice(&(dims as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u32).to_le_bytes());

    for entry in index.entries() {
        out.extend_from_slice(&vec_to_blob(entry.embedding.values()));
    }

    let meta: Vec<EntryMeta> = index
        .entries()
        .iter()
        .map(|e| EntryMeta {
            summary: e.summary.clone(),
            reference_text: e.reference_text.clone(),
            source_file: e.source_file.clone(),
        })
        .collect();
    out.extend_from_slice(&serde_json::to_vec(&meta).unwrap_or_else(|_| b"[]".to_vec()));
    out
}

/// Read only the content key from a snapshot header.
pub fn peek_key(bytes: &[u8]) -> Result<[u8; 32]> {
    let header = read_header(bytes)?;
    Ok(header.key)
}

/// Deserialize a snapshot blob produced by [`encode`].
///
/// # Errors
///
/// [`Error::Snapshot`] for a wrong magic, unsupported version, truncated
/// data, malformed metadata, or embeddings that are not unit-norm;
/// [`Error::EmptyCorpus`] for a snapshot with zero entries.
pub fn decode(bytes: &[u8]) -> Result<CorpusIndex> {
    let header = read_header(bytes)?;
    let vectors_len = header
        .count
        .checked_mul(header.dimension)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| Error::Snapshot("entry table size overflows".to_string()))?;
    let vectors_end = HEADER_LEN + vectors_len;
    if bytes.len() < vectors_end {
        return Err(Error::Snapshot(format!(
            "truncated: expected at least {} bytes, found {}",
            vectors_end,
            bytes.len()
        )));
    }

    let meta: Vec<EntryMeta> = serde_json::from_slice(&bytes[vectors_end..])
        .map_err(|e| Error::Snapshot(format!("metadata: {}", e)))?;
    if meta.len() != header.count {
        return Err(Error::Snapshot(format!(
            "metadata has {} entries, header says {}",
            meta.len(),
            header.count
        )));
    }

    let row_bytes = header.dimension * 8;
    let mut entries = Vec::with_capacity(header.count);
    for (i, m) in meta.into_iter().enumerate() {
        let start = HEADER_LEN + i * row_bytes;
        let values = blob_to_vec(&bytes[start..start + row_bytes]);
        if (l2_norm(&values) - 1.0).abs() > NORM_TOLERANCE {
            return Err(Error::Snapshot(format!("entry {} is not unit-norm", i)));
        }
        entries.push(CorpusEntry {
            embedding: EmbeddingVector::from_normalized(values),
            reference_text: m.reference_text,
            source_file: m.source_file,
            summary: m.summary,
        });
    }

    CorpusIndex::from_parts(entries, header.dimension, header.key)
}

struct Header {
    key: [u8; 32],
    dimension: usize,
    count: usize,
}

fn read_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Snapshot("shorter than header".to_string()));
    }
    if &bytes[..8] != MAGIC {
        return Err(Error::Snapshot("bad magic".to_string()));
    }
    let version = read_u32(&bytes[8..12]);
    if version != VERSION {
        return Err(Error::Snapshot(format!("unsupported version {}", version)));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[12..44]);
    let dimension = read_u32(&bytes[44..48]) as usize;
    let count = read_u32(&bytes[48..52]) as usize;
    if dimension == 0 {
        return Err(Error::Snapshot("zero dimension".to_string()));
    }
    Ok(Header {
        key,
        dimension,
        count,
    })
}

fn read_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&b[..4]);
    u32::from_le_bytes(buf)
}
