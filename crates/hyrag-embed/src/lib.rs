//! hyrag-embed - Query encoders
//!
//! This crate provides the ONNX Runtime query encoder used by the dense
//! backend, and a deterministic mock for tests.
//!
//! # Features
//!
//! - ONNX Runtime integration for CPU inference
//! - Mean or CLS pooling, L2-normalized output
//! - Optional query prefix for asymmetric retrieval models
//! - Batch document encoding for index builds

mod mock;
mod onnx;

pub use mock::MockEncoder;
pub use onnx::OnnxQueryEncoder;

// Re-export the encoder traits for convenience
pub use hyrag_core::{DocumentEncoder, QueryEncoder};
