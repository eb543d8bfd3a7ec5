//! Core data types flowing through the analysis pipeline.
//!
//! - [`CorpusRecord`]: one raw reference record from the corpus source file.
//! - [`Chunk`]: an ordered span of document text produced by the chunker.
//! - [`AnalysisResult`]: the outcome for one chunk, with a [`Finding`] that
//!   is either generated text or an explicit error marker.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A source-of-truth corpus record as stored on disk.
///
/// The legacy field names (`chunk_summary`, `doc_text`, `file_name`) are
/// accepted as aliases so existing exports load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub embedding: Vec<f64>,
    #[serde(alias = "chunk_summary", default)]
    pub summary: String,
    #[serde(alias = "doc_text")]
    pub reference_text: String,
    #[serde(alias = "file_name", default)]
    pub source_file: String,
}

/// A contiguous span of source text to analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position in the chunked document, starting at 0.
    pub index: usize,
    pub text: String,
}

/// Analysis output for one chunk.
///
/// Serialized with a `status` tag so callers can tell "no issues found"
/// (an `ok` finding whose text says so) apart from "analysis failed".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Finding {
    Ok { text: String },
    Error { kind: String, message: String },
}

impl Finding {
    pub fn from_error(err: &Error) -> Self {
        Finding::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Finding::Error { .. })
    }

    /// The generated text, or `None` for an error marker.
    pub fn text(&self) -> Option<&str> {
        match self {
            Finding::Ok { text } => Some(text),
            Finding::Error { .. } => None,
        }
    }
}

/// Outcome of the analysis pipeline for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Equals the originating [`Chunk::index`].
    pub chunk_index: usize,
    pub chunk_text: String,
    pub finding: Finding,
}

impl AnalysisResult {
    /// Build a result from a chunk and the outcome of its pipeline.
    pub fn from_outcome(chunk: &Chunk, outcome: Result<String, Error>) -> Self {
        let finding = match outcome {
            Ok(text) => Finding::Ok { text },
            Err(e) => Finding::from_error(&e),
        };
        Self {
            chunk_index: chunk.index,
            chunk_text: chunk.text.clone(),
            finding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accepts_legacy_field_names() {
        let json = r#"{
            "embedding": [0.1, 0.2],
            "chunk_summary": "Disclosures",
            "doc_text": "Past performance is not indicative of future results.",
            "file_name": "guide.pdf"
        }"#;
        let rec: CorpusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.summary, "Disclosures");
        assert_eq!(rec.source_file, "guide.pdf");
        assert!(rec.reference_text.starts_with("Past performance"));
    }

    #[test]
    fn record_requires_reference_text() {
        let json = r#"{ "embedding": [0.1], "summary": "s" }"#;
        assert!(serde_json::from_str::<CorpusRecord>(json).is_err());
    }

    #[test]
    fn finding_serializes_with_status_tag() {
        let chunk = Chunk {
            index: 3,
            text: "Returns are guaranteed.".to_string(),
        };
        let failed = AnalysisResult::from_outcome(
            &chunk,
            Err(Error::GenerationService("timed out".into())),
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["chunk_index"], 3);
        assert_eq!(json["finding"]["status"], "error");
        assert_eq!(json["finding"]["kind"], "generation_service");

        let ok = AnalysisResult::from_outcome(&chunk, Ok("All criteria met.".into()));
        assert_eq!(ok.finding.text(), Some("All criteria met."));
        assert!(!ok.finding.is_error());
    }
}
