//! Error kinds shared by the core and the analysis pipeline.

/// Every failure the core can report.
///
/// Each variant maps to a stable machine-readable code via [`Error::kind`],
/// which is what callers see in per-chunk error markers and HTTP bodies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("degenerate vector: L2 norm is zero or not finite")]
    DegenerateVector,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corpus has no entries")]
    EmptyCorpus,

    #[error("chunking unavailable: {0}")]
    ChunkingUnavailable(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("generation service error: {0}")]
    GenerationService(String),

    #[error("invalid corpus snapshot: {0}")]
    Snapshot(String),

    #[error("analysis cancelled before this chunk started")]
    Cancelled,
}

impl Error {
    /// Stable code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DegenerateVector => "degenerate_vector",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::EmptyCorpus => "empty_corpus",
            Error::ChunkingUnavailable(_) => "chunking_unavailable",
            Error::EmbeddingService(_) => "embedding_service",
            Error::GenerationService(_) => "generation_service",
            Error::Snapshot(_) => "snapshot",
            Error::Cancelled => "cancelled",
        }
    }

    /// Whether this error invalidates a whole analysis batch rather than a
    /// single chunk. A corpus that cannot answer queries of the embedding
    /// model's dimension is a configuration error, not a per-chunk one.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::EmptyCorpus | Error::Snapshot(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
