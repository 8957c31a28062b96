//! hyrag-query - Hybrid retrieval engine
//!
//! This crate fuses a sparse (BM25) ranking and a dense (embedding) ranking
//! with weighted Reciprocal Rank Fusion and resolves the winners to full
//! documents.
//!
//! # Features
//!
//! - Concurrent sparse and dense search under one deadline
//! - Weighted RRF with deterministic tie-breaking by document id
//! - Per-language backend registry, resolved once at startup
//! - Degrades to the surviving backend when one fails or times out
//!
//! # Example
//!
//! ```rust,ignore
//! use hyrag_query::{open_engine, prepare_chunks};
//!
//! let chunks = prepare_chunks(&config, &documents)?;
//! let engine = open_engine(&config, &chunks).await?;
//! let hits = engine.retrieve("memory safety", 5, Duration::from_secs(2)).await?;
//! ```

mod engine;
mod fusion;
mod indexer;
mod registry;

#[cfg(test)]
mod testing;

pub use engine::{BackendOutcome, FusionEngine, Retrieval};
pub use fusion::{reciprocal_rank_fusion, sort_fused, FusionParams};
pub use indexer::{build_bundle, open_engine, prepare_chunks};
pub use registry::{BackendBundle, BackendRegistry, BundleBuilder, DenseBackend};

// Re-export for convenience
pub use hyrag_core::{FusedHit, RetrievalConfig, SearchHit};
