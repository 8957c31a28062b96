//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocId, Document, Language, RankedHit};

/// Resolves document ids to stored payloads.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if it does not exist or cannot be decoded.
    async fn fetch(&self, id: &DocId) -> Result<Option<Document>>;
}

/// Lexical (term-statistics) ranked retrieval.
///
/// The analyzer used at query time must be the one the index was built with.
#[async_trait]
pub trait SparseIndex: DocumentStore {
    /// Return up to `k` hits ordered by descending relevance.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedHit>>;

    /// Language the index was analyzed with.
    fn language(&self) -> Language;
}

/// Nearest-neighbour retrieval over fixed-dimension vectors.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Return up to `k` hits ordered by descending similarity.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RankedHit>>;

    /// Vector dimension of the index.
    fn dimension(&self) -> usize;
}

/// Maps a query string to a dense vector.
#[async_trait]
pub trait QueryEncoder: Send + Sync {
    /// Embed a single query.
    async fn encode(&self, query: &str) -> Result<Vec<f32>>;

    /// Output dimension.
    fn dimension(&self) -> usize;
}

/// An encoder that can also embed corpus documents at build time.
#[async_trait]
pub trait DocumentEncoder: QueryEncoder {
    /// Embed a batch of documents, one vector per input in order.
    async fn encode_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
}

impl ChunkConfig {
    /// Configuration with the default overlap of one fifth of the chunk size.
    pub fn with_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_size / 5,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::with_size(500)
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into chunk strings.
    fn split(&self, text: &str, language: Language, config: &ChunkConfig) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_config_overlap() {
        let config = ChunkConfig::with_size(1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(ChunkConfig::default().chunk_size, 500);
    }
}
