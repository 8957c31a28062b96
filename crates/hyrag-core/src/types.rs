//! Core domain types for hybrid retrieval.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::RagError;

/// Chunk and document metadata.
///
/// Ordered so that serialized payloads are byte-stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Corpus language, selects analyzers, separators and backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

impl Language {
    /// Language code as used in configuration and cache keys.
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Zh => "zh",
        }
    }
}

impl FromStr for Language {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Self::En),
            "zh" => Ok(Self::Zh),
            other => Err(RagError::UnsupportedLanguage {
                language: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A chunk emitted by the chunking pass.
///
/// Serializes as `{"page_content": ..., "metadata": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text.
    #[serde(rename = "page_content")]
    pub content: String,

    /// Metadata inherited from the source document.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Identifier of an indexed document.
///
/// Assigned from the input position (`doc_<ordinal>`). Ordering is plain
/// string ordering and is the fusion tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for the document at `ordinal` in the input sequence.
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self(format!("doc_{}", ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a new document.
    pub fn new(id: DocId, content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id,
            content: content.into(),
            metadata,
        }
    }

    /// Turn an ordered chunk sequence into documents with positional ids.
    pub fn from_chunks(chunks: &[Chunk]) -> Vec<Self> {
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                Self::new(DocId::from_ordinal(i), &chunk.content, chunk.metadata.clone())
            })
            .collect()
    }
}

/// Blake3 fingerprint (hex) over an ordered document sequence.
///
/// Covers ids, content and metadata, so any edit, insertion or reorder
/// changes the fingerprint.
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        hasher.update(doc.id.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(doc.content.as_bytes());
        hasher.update(&[0]);
        // BTreeMap keeps this stable
        let metadata = serde_json::to_string(&doc.metadata).unwrap_or_default();
        hasher.update(metadata.as_bytes());
        hasher.update(&[0xff]);
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Retrieval backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sparse,
    Dense,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sparse => f.write_str("sparse"),
            Self::Dense => f.write_str("dense"),
        }
    }
}

/// A hit from a single backend, in backend rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub doc_id: DocId,

    /// Backend-native score. Only the position is used for fusion.
    pub score: f64,

    pub source: Backend,
}

impl RankedHit {
    pub fn new(doc_id: DocId, score: f64, source: Backend) -> Self {
        Self { doc_id, score, source }
    }
}

/// A hit after reciprocal rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: DocId,

    /// Sum of weighted reciprocal-rank contributions.
    pub fused_score: f64,

    /// 1-based rank in the sparse list, if present.
    pub sparse_rank: Option<u32>,

    /// 1-based rank in the dense list, if present.
    pub dense_rank: Option<u32>,
}

/// A resolved search result returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Identifier of the resolved document.
    pub doc_id: DocId,

    pub content: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Fused score (higher is better).
    pub score: f64,
}
