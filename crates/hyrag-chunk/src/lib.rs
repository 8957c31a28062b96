//! hyrag-chunk - Chunking and the chunk cache
//!
//! This crate turns source documents into chunks and caches the result per
//! `(language, chunk_size)` so later runs skip the chunking pass.
//!
//! # Example
//!
//! ```rust
//! use hyrag_chunk::{chunk_documents, RecursiveChunker, SourceDocument};
//! use hyrag_core::{ChunkConfig, Language};
//!
//! let docs = vec![SourceDocument::new("Hello world", Language::En)];
//! let config = ChunkConfig::default();
//! let chunks = chunk_documents(&RecursiveChunker::new(), &docs, Language::En, &config);
//! assert_eq!(chunks.len(), 1);
//! ```

mod cache;
mod documents;
mod recursive;

pub use cache::{CacheKey, ChunkCache};
pub use documents::{chunk_documents, read_jsonl, SourceDocument};
pub use recursive::RecursiveChunker;

// Re-export types for convenience
pub use hyrag_core::{Chunk, ChunkConfig, Chunker};
