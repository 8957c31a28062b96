//! Error types for hybrid retrieval.

use thiserror::Error;

use crate::types::Backend;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in hyrag.
#[derive(Error, Debug)]
pub enum RagError {
    /// Empty query or non-positive result count.
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// A configured backend could not be opened.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// No backend is usable for the active language.
    #[error("No retrieval backends available for language {language}")]
    NoBackendsAvailable { language: String },

    /// Every configured backend exceeded the call deadline.
    #[error("Retrieval timed out after {elapsed_ms}ms")]
    RetrievalTimeout { elapsed_ms: u64 },

    /// A document id could not be resolved to a payload.
    #[error("Unresolvable document: {id}")]
    UnresolvableDocument { id: String },

    /// A cache entry failed to parse.
    #[error("Corrupt cache entry {key}: {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// Vector dimensions disagree.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Language has no analyzer or no registered backends.
    #[error("Unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Chunking error.
    #[error("Chunking error: {message}")]
    Chunking { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(backend: Backend, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a chunking error.
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RetrievalTimeout { .. })
    }

    /// Stable error code for logs and callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::NoBackendsAvailable { .. } => "NO_BACKENDS_AVAILABLE",
            Self::RetrievalTimeout { .. } => "RETRIEVAL_TIMEOUT",
            Self::UnresolvableDocument { .. } => "UNRESOLVABLE_DOCUMENT",
            Self::CacheCorrupt { .. } => "CACHE_CORRUPT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::UnsupportedLanguage { .. } => "UNSUPPORTED_LANGUAGE",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Chunking { .. } => "CHUNKING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
