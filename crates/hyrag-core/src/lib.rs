//! hyrag-core - Core types and traits for hybrid retrieval
//!
//! This crate provides the domain types, backend contracts, configuration
//! and error handling shared by the hyrag crates.

pub mod blocking;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use blocking::run_blocking;
pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
