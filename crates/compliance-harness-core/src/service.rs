//! Call contracts for the external embedding and generation services.
//!
//! The core never talks to a network. Concrete clients (OpenAI, Azure
//! OpenAI, Ollama) live in the application crate; tests supply in-process
//! implementations. Implementations must be safe to call concurrently:
//! one instance is shared by every in-flight chunk pipeline.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Produces raw (not necessarily normalized) embedding vectors.
///
/// Failures are reported as [`Error::EmbeddingService`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// Embed several texts, returning one vector per input in input order.
    ///
    /// The default implementation calls [`embed`](Embedder::embed) once per
    /// text; remote clients override it with a single batched request.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Produces a finding for one chunk of text.
///
/// Failures are reported as [`Error::GenerationService`].
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate a response from fixed instructions, retrieved reference
    /// context, and the chunk under analysis.
    async fn generate(
        &self,
        system_instructions: &str,
        reference_context: &str,
        chunk_text: &str,
    ) -> Result<String>;
}

/// Build the `EmbeddingService` error for a response carrying the wrong
/// number of vectors.
pub fn count_mismatch(expected: usize, actual: usize) -> Error {
    Error::EmbeddingService(format!(
        "expected {} embeddings, service returned {}",
        expected, actual
    ))
}
