//! Stored document payloads and their resolution.
//!
//! Each document is stored as an envelope
//! `{"id": ..., "contents": ..., "raw": "<json {original_content, metadata}>"}`.
//! Resolution tries [`RESOLUTION_CHAIN`] in order; a payload no strategy can
//! decode is unresolvable.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hyrag_core::{DocId, Document, Metadata, Result};

/// Outer payload written at build time.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: &'a str,
    contents: &'a str,
    raw: String,
}

/// Inner payload, JSON-encoded into the envelope's `raw` field.
#[derive(Debug, Serialize)]
struct RawPayload<'a> {
    original_content: &'a str,
    metadata: &'a Metadata,
}

/// Lenient view of the envelope for decoding.
#[derive(Debug, Deserialize)]
struct EnvelopeView {
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPayloadView {
    #[serde(default)]
    original_content: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

/// Encode a document into its stored envelope.
pub fn encode_envelope(doc: &Document) -> Result<String> {
    let raw = serde_json::to_string(&RawPayload {
        original_content: &doc.content,
        metadata: &doc.metadata,
    })?;

    Ok(serde_json::to_string(&Envelope {
        id: doc.id.as_str(),
        contents: &doc.content,
        raw,
    })?)
}

/// A pure decoding strategy from stored bytes to a document.
pub type ResolveFn = fn(&str, &DocId) -> Option<Document>;

/// A named entry in the resolution chain.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub resolve: ResolveFn,
}

/// Resolution strategies, most complete first.
pub const RESOLUTION_CHAIN: &[Strategy] = &[
    Strategy {
        name: "nested_raw",
        resolve: nested_raw,
    },
    Strategy {
        name: "flat_contents",
        resolve: flat_contents,
    },
];

/// Content and metadata from the nested `raw` payload.
pub fn nested_raw(stored: &str, id: &DocId) -> Option<Document> {
    let envelope: EnvelopeView = serde_json::from_str(stored).ok()?;
    let inner: RawPayloadView = serde_json::from_str(envelope.raw.as_deref()?).ok()?;
    let content = inner.original_content.filter(|c| !c.is_empty())?;
    Some(Document::new(id.clone(), content, inner.metadata.unwrap_or_default()))
}

/// Content from the flat `contents` field, without metadata.
pub fn flat_contents(stored: &str, id: &DocId) -> Option<Document> {
    let envelope: EnvelopeView = serde_json::from_str(stored).ok()?;
    let content = envelope.contents.filter(|c| !c.is_empty())?;
    Some(Document::new(id.clone(), content, Metadata::new()))
}

/// Run the resolution chain over a stored payload.
pub fn resolve(stored: &str, id: &DocId) -> Option<Document> {
    for strategy in RESOLUTION_CHAIN {
        if let Some(doc) = (strategy.resolve)(stored, id) {
            debug!("Resolved {} via {}", id, strategy.name);
            return Some(doc);
        }
    }

    warn!("Document {} is unresolvable: no strategy decoded its payload", id);
    None
}
