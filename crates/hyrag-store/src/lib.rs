//! hyrag-store - SQLite-backed retrieval indexes
//!
//! This crate provides the BM25 sparse index (which doubles as the document
//! store) and a flat dense vector index. Both are single SQLite files that
//! are built once, published atomically and loaded on later starts.

mod analyzer;
mod dense;
mod payload;
mod schema;
mod sparse;
mod sqlite;

pub use analyzer::Analyzer;
pub use dense::{Metric, SqliteDenseIndex};
pub use payload::{encode_envelope, resolve, Strategy, RESOLUTION_CHAIN};
pub use sparse::{SparseParams, SqliteSparseIndex};

// Re-export schema for inspection tooling
pub use schema::{DENSE_SCHEMA, SCHEMA_VERSION, SPARSE_SCHEMA};
