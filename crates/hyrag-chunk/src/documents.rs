//! Source documents and the chunking pass over them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hyrag_core::{Chunk, ChunkConfig, Chunker, Language, Metadata, Result};

/// A corpus record before chunking.
///
/// Every field other than `content` is carried into the metadata of each
/// chunk cut from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,

    /// Language code; records in other languages are skipped.
    pub language: String,

    #[serde(flatten)]
    pub fields: Metadata,
}

impl SourceDocument {
    pub fn new(content: impl Into<String>, language: Language) -> Self {
        Self {
            content: content.into(),
            language: language.code().to_string(),
            fields: Metadata::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// All fields except `content`.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = self.fields.clone();
        metadata.insert("language".to_string(), serde_json::Value::String(self.language.clone()));
        metadata
    }
}

/// Read a JSON Lines corpus.
///
/// Records without a string `content` and `language` are skipped with a
/// warning.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<SourceDocument>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;

    let mut documents = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SourceDocument>(line) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!("Skipping record {} of {:?}: {}", line_no + 1, path, e),
        }
    }

    info!("Read {} source documents from {:?}", documents.len(), path);
    Ok(documents)
}

/// Chunk every document in `language`, in input order.
///
/// A document that fails to split is logged and skipped.
pub fn chunk_documents<C>(
    chunker: &C,
    documents: &[SourceDocument],
    language: Language,
    config: &ChunkConfig,
) -> Vec<Chunk>
where
    C: Chunker + ?Sized,
{
    let mut chunks = Vec::new();

    for doc in documents.iter().filter(|d| d.language == language.code()) {
        match chunker.split(&doc.content, language, config) {
            Ok(pieces) => {
                let metadata = doc.metadata();
                chunks.extend(pieces.into_iter().map(|piece| Chunk::new(piece, metadata.clone())));
            }
            Err(e) => warn!("Error chunking document: {}", e),
        }
    }

    info!(
        "Created {} chunks (language={}, chunk_size={}, overlap={})",
        chunks.len(),
        language,
        config.chunk_size,
        config.chunk_overlap
    );
    chunks
}
