//! Deterministic encoder for tests.

use async_trait::async_trait;

use hyrag_core::{DocumentEncoder, QueryEncoder, Result};

use crate::onnx::l2_normalize;

/// Hashes words into a fixed number of buckets.
///
/// Texts that share words get similar vectors, so dense rankings in tests
/// follow lexical overlap. CJK characters hash individually.
pub struct MockEncoder {
    dimension: usize,
}

impl MockEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        l2_normalize(embedding)
    }
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new(64)
    }
}

fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            word.push(c.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
        if c.is_alphanumeric() {
            out.push(c.to_string());
        }
    }
    if !word.is_empty() {
        out.push(word);
    }
    out
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl QueryEncoder for MockEncoder {
    async fn encode(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self.embed(query))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl DocumentEncoder for MockEncoder {
    async fn encode_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}
