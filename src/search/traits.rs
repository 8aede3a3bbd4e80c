//! The two seams the core library leaves to its caller: turning text into
//! vectors, and turning a file into chunks. The teacher's `Embedder` (shape
//! inferred from `indexes/caching.rs`'s `semantic.get_embedder().batch_embed(..)`
//! call site) and `chunking/` module are the models; concrete
//! implementations are out of scope here.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),
    #[error("embedding provider timed out")]
    Timeout,
}

/// Blocking by contract (spec: "embedding HTTP call" is a suspension
/// point callers must assume any public search method may block on).
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub line_start: usize,
    pub line_end: usize,
    pub language: Option<String>,
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, path: &Path, content: &str) -> Vec<Chunk>;
}

/// A fixed-vector test double; no HTTP call, deterministic output.
pub struct NullEmbeddingProvider {
    pub dimension: usize,
}

impl EmbeddingProvider for NullEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32;
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_embedding_provider_is_deterministic() {
        let provider = NullEmbeddingProvider { dimension: 4 };
        assert_eq!(provider.embed("hello").unwrap(), provider.embed("hello").unwrap());
    }
}
