//! In-memory backends for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use hyrag_core::{
    Backend, DenseIndex, DocId, Document, DocumentStore, Language, Metadata, QueryEncoder,
    RagError, RankedHit, Result, SparseIndex,
};

fn document(id: &str) -> Document {
    let mut metadata = Metadata::new();
    metadata.insert("origin".to_string(), serde_json::json!(id));
    Document::new(DocId::from(id), format!("content of {}", id), metadata)
}

fn ranked(ids: &[&str], source: Backend) -> Vec<RankedHit> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| RankedHit::new(DocId::from(*id), 100.0 - i as f64, source))
        .collect()
}

/// Shared failure knobs.
#[derive(Default)]
struct Behaviour {
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
}

impl Behaviour {
    async fn enter(&self, backend: Backend) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(RagError::database(format!("{} backend exploded", backend)));
        }
        Ok(())
    }
}

pub(crate) struct FakeSparse {
    language: Language,
    hits: Vec<RankedHit>,
    docs: HashMap<DocId, Document>,
    behaviour: Behaviour,
}

impl FakeSparse {
    pub(crate) fn new(language: Language) -> Self {
        Self {
            language,
            hits: Vec::new(),
            docs: HashMap::new(),
            behaviour: Behaviour::default(),
        }
    }

    /// Ranked result list; every id also becomes a stored document.
    pub(crate) fn with_hits(mut self, ids: &[&str]) -> Self {
        self.hits = ranked(ids, Backend::Sparse);
        self.with_docs(ids)
    }

    pub(crate) fn with_docs(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.docs.insert(DocId::from(*id), document(id));
        }
        self
    }

    pub(crate) fn without_doc(mut self, id: &str) -> Self {
        self.docs.remove(&DocId::from(id));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.behaviour.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.behaviour.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.behaviour.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FakeSparse {
    async fn fetch(&self, id: &DocId) -> Result<Option<Document>> {
        Ok(self.docs.get(id).cloned())
    }
}

#[async_trait]
impl SparseIndex for FakeSparse {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RankedHit>> {
        self.behaviour.enter(Backend::Sparse).await?;
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    fn language(&self) -> Language {
        self.language
    }
}

pub(crate) struct FakeDense {
    dimension: usize,
    hits: Vec<RankedHit>,
    behaviour: Behaviour,
}

impl FakeDense {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            hits: Vec::new(),
            behaviour: Behaviour::default(),
        }
    }

    pub(crate) fn with_hits(mut self, ids: &[&str]) -> Self {
        self.hits = ranked(ids, Backend::Dense);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.behaviour.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.behaviour.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.behaviour.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DenseIndex for FakeDense {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RankedHit>> {
        if embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        self.behaviour.enter(Backend::Dense).await?;
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub(crate) struct FakeEncoder {
    dimension: usize,
    calls: AtomicUsize,
}

impl FakeEncoder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEncoder for FakeEncoder {
    async fn encode(&self, _query: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.5; self.dimension])
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
