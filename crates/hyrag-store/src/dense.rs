//! Flat dense vector index persisted in SQLite.
//!
//! Vectors are loaded into memory on open and scanned exhaustively per query.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hyrag_core::{
    corpus_fingerprint, run_blocking, Backend, DenseIndex, DocId, Document, DocumentStore,
    RagError, RankedHit, Result,
};

use crate::payload::{encode_envelope, resolve};
use crate::schema::DENSE_SCHEMA;
use crate::sqlite::{
    build_atomically, bytes_to_vec, parse_meta, read_meta, require_meta, vec_to_bytes, write_meta,
    SqliteDb,
};

/// Similarity used to rank vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Raw dot product, for encoders that emit normalized vectors.
    InnerProduct,
    Cosine,
}

impl Default for Metric {
    fn default() -> Self {
        Self::InnerProduct
    }
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InnerProduct => "inner_product",
            Self::Cosine => "cosine",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "inner_product" => Some(Self::InnerProduct),
            "cosine" => Some(Self::Cosine),
            _ => None,
        }
    }
}

/// Vectors held in memory for exact search.
struct VectorTable {
    ids: Vec<DocId>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
    dimension: usize,
    metric: Metric,
}

impl VectorTable {
    fn similarity(&self, query: &[f32], query_norm: f32, i: usize) -> f32 {
        let dot = dot(query, &self.vectors[i]);
        match self.metric {
            Metric::InnerProduct => dot,
            Metric::Cosine => {
                let denom = query_norm * self.norms[i];
                if denom == 0.0 {
                    0.0
                } else {
                    dot / denom
                }
            }
        }
    }

    /// Score every vector; similarity descending, then doc-id ascending.
    fn top_k(&self, embedding: &[f32], k: usize) -> Vec<RankedHit> {
        let query_norm = norm(embedding);
        let mut scored: Vec<(usize, f32)> = (0..self.ids.len())
            .map(|i| (i, self.similarity(embedding, query_norm, i)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        scored.truncate(k);

        debug!("Dense search returned {} hits", scored.len());

        scored
            .into_iter()
            .map(|(i, score)| RankedHit::new(self.ids[i].clone(), score as f64, Backend::Dense))
            .collect()
    }
}

/// Exhaustive nearest-neighbour index over an in-memory vector table.
///
/// Scans and payload reads run on the blocking thread pool.
pub struct SqliteDenseIndex {
    db: Arc<SqliteDb>,
    table: Arc<VectorTable>,
}

impl SqliteDenseIndex {
    /// Build an index from documents and their embeddings, or load the one
    /// already at `path`.
    pub fn build(
        path: impl AsRef<Path>,
        documents: &[Document],
        embeddings: &[Vec<f32>],
        metric: Metric,
    ) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            info!("Loading existing dense index from {:?}", path);
            let index = Self::open(path)?;
            let stored = index.db.with_conn(|conn| read_meta(conn, "fingerprint"))?;
            if stored.as_deref() != Some(corpus_fingerprint(documents).as_str()) {
                warn!(
                    "Dense index at {:?} was built from a different document set; \
                     serving stale index",
                    path
                );
            }
            return Ok(index);
        }

        if documents.len() != embeddings.len() {
            return Err(RagError::embedding(format!(
                "Got {} embeddings for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        info!(
            "Building dense index at {:?}: {} vectors, dim={}, metric={}",
            path,
            documents.len(),
            dimension,
            metric.name()
        );

        let fingerprint = corpus_fingerprint(documents);
        build_atomically(path, DENSE_SCHEMA, |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO vectors (ordinal, id, embedding, raw) \
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;
                for (ordinal, (doc, embedding)) in documents.iter().zip(embeddings).enumerate() {
                    stmt.execute(params![
                        ordinal as i64,
                        doc.id.as_str(),
                        vec_to_bytes(embedding),
                        encode_envelope(doc)?
                    ])
                    .map_err(|e| {
                        RagError::database(format!("Failed to insert vector {}: {}", doc.id, e))
                    })?;
                }
            }

            write_meta(&tx, "kind", "dense")?;
            write_meta(&tx, "dimension", &dimension.to_string())?;
            write_meta(&tx, "metric", metric.name())?;
            write_meta(&tx, "fingerprint", &fingerprint)?;

            tx.commit().map_err(|e| RagError::database(e.to_string()))
        })?;

        Self::open(path)
    }

    /// Open an existing index and load its vectors.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = SqliteDb::open_existing(path.as_ref())?;

        let (dimension, metric, rows) = db.with_conn(|conn| {
            let kind = require_meta(conn, "kind")?;
            if kind != "dense" {
                return Err(RagError::config(format!(
                    "Expected a dense index, found '{}'",
                    kind
                )));
            }
            let dimension: usize = parse_meta("dimension", &require_meta(conn, "dimension")?)?;
            let metric_name = require_meta(conn, "metric")?;
            let metric = Metric::from_name(&metric_name).ok_or_else(|| {
                RagError::config(format!("Unknown metric '{}' in index", metric_name))
            })?;

            let mut stmt = conn
                .prepare("SELECT id, embedding FROM vectors ORDER BY ordinal")
                .map_err(|e| RagError::database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok((dimension, metric, rows))
        })?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        for (id, blob) in rows {
            let vector = bytes_to_vec(&blob)?;
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            ids.push(DocId::new(id));
            vectors.push(vector);
        }
        let norms = vectors.iter().map(|v| norm(v)).collect();

        info!("Dense index ready: {} vectors, dim={}", ids.len(), dimension);

        Ok(Self {
            db: Arc::new(db),
            table: Arc::new(VectorTable {
                ids,
                vectors,
                norms,
                dimension,
                metric,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.table.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.ids.is_empty()
    }

    pub fn metric(&self) -> Metric {
        self.table.metric
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[async_trait]
impl DocumentStore for SqliteDenseIndex {
    async fn fetch(&self, id: &DocId) -> Result<Option<Document>> {
        let db = Arc::clone(&self.db);
        let id = id.clone();

        run_blocking(move || {
            let stored: Option<String> = db.with_conn(|conn| {
                conn.query_row(
                    "SELECT raw FROM vectors WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RagError::database(e.to_string()))
            })?;

            Ok(stored.and_then(|raw| resolve(&raw, &id)))
        })
        .await
    }
}

#[async_trait]
impl DenseIndex for SqliteDenseIndex {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RankedHit>> {
        if embedding.len() != self.table.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.table.dimension,
                actual: embedding.len(),
            });
        }

        let table = Arc::clone(&self.table);
        let embedding = embedding.to_vec();
        run_blocking(move || Ok(table.top_k(&embedding, k))).await
    }

    fn dimension(&self) -> usize {
        self.table.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyrag_core::{Chunk, Metadata};

    fn docs() -> Vec<Document> {
        Document::from_chunks(&[
            Chunk::new("north", Metadata::new()),
            Chunk::new("east", Metadata::new()),
            Chunk::new("north-east", Metadata::new()),
        ])
    }

    fn embeddings() -> Vec<Vec<f32>> {
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]]
    }

    fn build(dir: &tempfile::TempDir, vectors: &[Vec<f32>], metric: Metric) -> SqliteDenseIndex {
        SqliteDenseIndex::build(dir.path().join("d.db"), &docs(), vectors, metric).unwrap()
    }

    #[tokio::test]
    async fn test_inner_product_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(&dir, &embeddings(), Metric::InnerProduct);

        assert_eq!(index.dimension(), 2);
        assert_eq!(index.len(), 3);

        let hits = index.search(&[1.0, 0.1], 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["doc_2", "doc_0", "doc_1"]);
        assert!(hits.iter().all(|h| h.source == Backend::Dense));
    }

    #[tokio::test]
    async fn test_cosine_search_and_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(&dir, &embeddings(), Metric::Cosine);

        let hits = index.search(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, DocId::from("doc_0"));
    }

    #[tokio::test]
    async fn test_equal_similarity_tie_break_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let index = build(&dir, &vectors, Metric::Cosine);

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].doc_id, DocId::from("doc_0"));
        assert_eq!(hits[1].doc_id, DocId::from("doc_1"));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(&dir, &embeddings(), Metric::InnerProduct);

        let err = index.search(&[1.0, 0.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_build_rejects_ragged_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.db");
        let ragged = vec![vec![1.0, 0.0], vec![1.0], vec![0.0, 1.0]];

        assert!(SqliteDenseIndex::build(&path, &docs(), &ragged, Metric::Cosine).is_err());
        let short = &embeddings()[..2];
        assert!(SqliteDenseIndex::build(&path, &docs(), short, Metric::Cosine).is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reopen_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.db");
        SqliteDenseIndex::build(&path, &docs(), &embeddings(), Metric::Cosine).unwrap();

        // Second build with different input loads the stored index
        let index =
            SqliteDenseIndex::build(&path, &docs()[..1], &embeddings()[..1], Metric::InnerProduct)
                .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.metric(), Metric::Cosine);

        let doc = index.fetch(&DocId::from("doc_2")).await.unwrap().unwrap();
        assert_eq!(doc.content, "north-east");
        assert!(index.fetch(&DocId::from("doc_7")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_yields_while_scanning() {
        let chunks: Vec<Chunk> = (0..20_000)
            .map(|i| Chunk::new(format!("row {}", i), Metadata::new()))
            .collect();
        let docs = Document::from_chunks(&chunks);
        let vectors: Vec<Vec<f32>> = (0..docs.len())
            .map(|i| (0..64).map(|j| ((i * 31 + j) % 17) as f32).collect())
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let index =
            SqliteDenseIndex::build(dir.path().join("d.db"), &docs, &vectors, Metric::Cosine)
                .unwrap();

        let query = vec![1.0; 64];
        let raced =
            tokio::time::timeout(std::time::Duration::ZERO, index.search(&query, 5)).await;
        assert!(raced.is_err());

        assert_eq!(index.search(&query, 5).await.unwrap().len(), 5);
    }
}
