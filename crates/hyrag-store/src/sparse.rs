//! SQLite-backed BM25 inverted index.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use hyrag_core::{
    corpus_fingerprint, run_blocking, Backend, DocId, Document, DocumentStore, Language, RagError,
    RankedHit, Result, SparseIndex,
};

use crate::analyzer::Analyzer;
use crate::payload::{encode_envelope, resolve};
use crate::schema::SPARSE_SCHEMA;
use crate::sqlite::{
    build_atomically, parse_meta, read_meta, require_meta, write_meta, SqliteDb,
};

/// BM25 and analysis parameters for a sparse index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseParams {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization.
    pub b: f64,
    /// Selects the analyzer.
    pub language: Language,
}

impl SparseParams {
    pub fn new(language: Language) -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            language,
        }
    }

    pub fn with_bm25(mut self, k1: f64, b: f64) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }
}

/// Corpus statistics captured at build time.
#[derive(Debug, Clone, Copy)]
struct CorpusStats {
    doc_count: u64,
    avg_length: f64,
}

/// Everything needed to score a query, detached from the index handle so it
/// can move onto the blocking pool.
#[derive(Debug, Clone, Copy)]
struct Bm25 {
    params: SparseParams,
    analyzer: Analyzer,
    stats: CorpusStats,
}

impl Bm25 {
    fn idf(&self, df: u64) -> f64 {
        let n = self.stats.doc_count as f64;
        let df = df as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn term_weight(&self, tf: u64, length: u64) -> f64 {
        let SparseParams { k1, b, .. } = self.params;
        let tf = tf as f64;
        let norm = if self.stats.avg_length > 0.0 {
            1.0 - b + b * length as f64 / self.stats.avg_length
        } else {
            1.0
        };
        tf * (k1 + 1.0) / (tf + k1 * norm)
    }

    /// Score every document containing at least one query term.
    fn score(&self, db: &SqliteDb, query: &str) -> Result<Vec<(DocId, f64)>> {
        let terms: BTreeSet<String> = self.analyzer.tokenize(query).into_iter().collect();
        if terms.is_empty() || self.stats.doc_count == 0 {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<i64, (DocId, f64)> = HashMap::new();

        db.with_conn(|conn| {
            let mut df_stmt = conn
                .prepare("SELECT df FROM terms WHERE term = ?1")
                .map_err(|e| RagError::database(e.to_string()))?;
            let mut posting_stmt = conn
                .prepare(
                    r#"
                    SELECT p.ordinal, d.id, p.tf, d.length
                    FROM postings p
                    JOIN documents d ON d.ordinal = p.ordinal
                    WHERE p.term = ?1
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            for term in &terms {
                let df: Option<i64> = df_stmt
                    .query_row(params![term], |row| row.get(0))
                    .optional()
                    .map_err(|e| RagError::database(e.to_string()))?;
                let Some(df) = df else { continue };
                let idf = self.idf(df as u64);

                let rows = posting_stmt
                    .query_map(params![term], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })
                    .map_err(|e| RagError::database(e.to_string()))?;

                for row in rows {
                    let (ordinal, id, tf, length) =
                        row.map_err(|e| RagError::database(e.to_string()))?;
                    let contribution = idf * self.term_weight(tf as u64, length as u64);
                    scores
                        .entry(ordinal)
                        .or_insert_with(|| (DocId::new(id), 0.0))
                        .1 += contribution;
                }
            }

            Ok(())
        })?;

        Ok(scores.into_values().collect())
    }

    /// Ranked top `k`: score descending, then doc-id ascending.
    fn top_k(&self, db: &SqliteDb, query: &str, k: usize) -> Result<Vec<RankedHit>> {
        let mut scored = self.score(db, query)?;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        debug!("Sparse search returned {} hits for {:?}", scored.len(), query);

        Ok(scored
            .into_iter()
            .map(|(id, score)| RankedHit::new(id, score, Backend::Sparse))
            .collect())
    }
}

fn read_stored(db: &SqliteDb, id: &DocId) -> Result<Option<Document>> {
    let stored: Option<String> = db.with_conn(|conn| {
        conn.query_row(
            "SELECT raw FROM documents WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| RagError::database(e.to_string()))
    })?;

    Ok(stored.and_then(|raw| resolve(&raw, id)))
}

/// Whether decoding the stored payload gives back exactly `doc`.
fn round_trips(doc: &Document) -> bool {
    encode_envelope(doc)
        .ok()
        .and_then(|raw| resolve(&raw, &doc.id))
        .is_some_and(|stored| &stored == doc)
}

/// BM25 index persisted in a single SQLite file.
///
/// Also serves as the [`DocumentStore`] for its documents. Documents ingested
/// by this process are kept resident and returned without touching the
/// stored payload; after a cold open every fetch decodes the payload.
///
/// Queries and payload reads run on the blocking thread pool.
pub struct SqliteSparseIndex {
    db: Arc<SqliteDb>,
    bm25: Bm25,
    fingerprint: Option<String>,
    resident: HashMap<DocId, Document>,
}

impl SqliteSparseIndex {
    /// Build an index at `path`, or load it if one already exists there.
    ///
    /// An existing index is never rebuilt. If the offered documents differ
    /// from the ones it was built from, a warning is logged and the existing
    /// index is served as-is.
    pub fn build(
        path: impl AsRef<Path>,
        documents: &[Document],
        params: SparseParams,
    ) -> Result<Self> {
        let path = path.as_ref();
        let fingerprint = corpus_fingerprint(documents);

        if path.exists() {
            info!("Loading existing sparse index from {:?}", path);
            let index = Self::open(path, params)?;
            if index.fingerprint.as_deref() != Some(fingerprint.as_str()) {
                warn!(
                    "Sparse index at {:?} was built from a different document set; \
                     serving stale index",
                    path
                );
            }
            return Ok(index);
        }

        let analyzer = Analyzer::for_language(params.language);
        info!(
            "Building sparse index at {:?}: {} documents, analyzer={}",
            path,
            documents.len(),
            analyzer.name()
        );

        build_atomically(path, SPARSE_SCHEMA, |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            let mut document_freq: HashMap<String, u64> = HashMap::new();
            let mut total_length: u64 = 0;

            {
                let mut doc_stmt = tx
                    .prepare(
                        "INSERT INTO documents (ordinal, id, raw, length) \
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;
                let mut posting_stmt = tx
                    .prepare("INSERT INTO postings (term, ordinal, tf) VALUES (?1, ?2, ?3)")
                    .map_err(|e| RagError::database(e.to_string()))?;

                for (ordinal, doc) in documents.iter().enumerate() {
                    let tokens = analyzer.tokenize(&doc.content);
                    let length = tokens.len() as u64;
                    total_length += length;

                    let mut term_freq: HashMap<String, u64> = HashMap::new();
                    for token in tokens {
                        *term_freq.entry(token).or_default() += 1;
                    }

                    doc_stmt
                        .execute(params![
                            ordinal as i64,
                            doc.id.as_str(),
                            encode_envelope(doc)?,
                            length as i64
                        ])
                        .map_err(|e| {
                            RagError::database(format!(
                                "Failed to insert document {}: {}",
                                doc.id, e
                            ))
                        })?;

                    for (term, tf) in term_freq {
                        posting_stmt
                            .execute(params![term, ordinal as i64, tf as i64])
                            .map_err(|e| {
                                RagError::database(format!("Failed to insert posting: {}", e))
                            })?;
                        *document_freq.entry(term).or_default() += 1;
                    }
                }

                let mut term_stmt = tx
                    .prepare("INSERT INTO terms (term, df) VALUES (?1, ?2)")
                    .map_err(|e| RagError::database(e.to_string()))?;
                for (term, df) in &document_freq {
                    term_stmt
                        .execute(params![term, *df as i64])
                        .map_err(|e| RagError::database(e.to_string()))?;
                }
            }

            write_meta(&tx, "kind", "sparse")?;
            write_meta(&tx, "analyzer", analyzer.name())?;
            write_meta(&tx, "language", params.language.code())?;
            write_meta(&tx, "doc_count", &documents.len().to_string())?;
            write_meta(&tx, "total_length", &total_length.to_string())?;
            write_meta(&tx, "fingerprint", &fingerprint)?;

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Indexed {} distinct terms", document_freq.len());
            Ok(())
        })?;

        // Resident documents must match what a cold open would resolve
        let mut index = Self::open(path, params)?;
        index.resident = documents
            .iter()
            .filter(|doc| round_trips(doc))
            .map(|doc| (doc.id.clone(), doc.clone()))
            .collect();
        if index.resident.len() < documents.len() {
            warn!(
                "{} documents do not resolve from their stored payload",
                documents.len() - index.resident.len()
            );
        }
        Ok(index)
    }

    /// Open an existing index for serving.
    ///
    /// Fails if the index was analyzed differently than `params.language`
    /// requires.
    pub fn open(path: impl AsRef<Path>, params: SparseParams) -> Result<Self> {
        let db = SqliteDb::open_existing(path.as_ref())?;

        let (stored_analyzer, doc_count, total_length, fingerprint) = db.with_conn(|conn| {
            let kind = require_meta(conn, "kind")?;
            if kind != "sparse" {
                return Err(RagError::config(format!(
                    "Expected a sparse index, found '{}'",
                    kind
                )));
            }
            let analyzer = require_meta(conn, "analyzer")?;
            let doc_count: u64 = parse_meta("doc_count", &require_meta(conn, "doc_count")?)?;
            let total_length: u64 =
                parse_meta("total_length", &require_meta(conn, "total_length")?)?;
            let fingerprint = read_meta(conn, "fingerprint")?;
            Ok((analyzer, doc_count, total_length, fingerprint))
        })?;

        let analyzer = Analyzer::from_name(&stored_analyzer).ok_or_else(|| {
            RagError::config(format!("Unknown analyzer '{}' in index", stored_analyzer))
        })?;
        let expected = Analyzer::for_language(params.language);
        if analyzer != expected {
            return Err(RagError::config(format!(
                "Index at {:?} was built with the {} analyzer but language {} requires {}",
                db.path(),
                analyzer.name(),
                params.language,
                expected.name()
            )));
        }

        let avg_length = if doc_count > 0 {
            total_length as f64 / doc_count as f64
        } else {
            0.0
        };

        info!(
            "Sparse index ready: {} documents, avg length {:.1}, k1={}, b={}",
            doc_count, avg_length, params.k1, params.b
        );

        Ok(Self {
            db: Arc::new(db),
            bm25: Bm25 {
                params,
                analyzer,
                stats: CorpusStats {
                    doc_count,
                    avg_length,
                },
            },
            fingerprint,
            resident: HashMap::new(),
        })
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.bm25.stats.doc_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bm25.stats.doc_count == 0
    }

    /// Number of documents held by the in-process fast path.
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    pub fn params(&self) -> SparseParams {
        self.bm25.params
    }

    /// Decode a document from its stored payload, bypassing the fast path.
    ///
    /// Runs on the calling thread.
    pub fn fetch_stored(&self, id: &DocId) -> Result<Option<Document>> {
        read_stored(&self.db, id)
    }
}

#[async_trait]
impl DocumentStore for SqliteSparseIndex {
    async fn fetch(&self, id: &DocId) -> Result<Option<Document>> {
        if let Some(doc) = self.resident.get(id) {
            return Ok(Some(doc.clone()));
        }

        let db = Arc::clone(&self.db);
        let id = id.clone();
        run_blocking(move || read_stored(&db, &id)).await
    }
}

#[async_trait]
impl SparseIndex for SqliteSparseIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedHit>> {
        let db = Arc::clone(&self.db);
        let bm25 = self.bm25;
        let query = query.to_string();
        run_blocking(move || bm25.top_k(&db, &query, k)).await
    }

    fn language(&self) -> Language {
        self.bm25.params.language
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyrag_core::{Chunk, Metadata};
    use std::time::Duration;

    fn en() -> SparseParams {
        SparseParams::new(Language::En)
    }

    fn corpus() -> Vec<Document> {
        let chunks: Vec<Chunk> = [
            "Rust is a systems programming language focused on safety.",
            "Python is a popular scripting language.",
            "The borrow checker enforces memory safety in Rust programs.",
            "Gardening tips for growing tomatoes in summer.",
        ]
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let mut metadata = Metadata::new();
            metadata.insert("position".to_string(), serde_json::json!(i));
            Chunk::new(*text, metadata)
        })
        .collect();
        Document::from_chunks(&chunks)
    }

    #[tokio::test]
    async fn test_build_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteSparseIndex::build(dir.path().join("en.db"), &corpus(), en()).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.language(), Language::En);

        let hits = index.search("rust safety", 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"doc_0"));
        assert!(ids.contains(&"doc_2"));
        assert!(hits.iter().all(|h| h.source == Backend::Sparse));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_truncates_and_handles_misses() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteSparseIndex::build(dir.path().join("en.db"), &corpus(), en()).unwrap();

        assert_eq!(index.search("language", 1).await.unwrap().len(), 1);
        assert!(index.search("kubernetes", 10).await.unwrap().is_empty());
        // Only stop words
        assert!(index.search("the of and", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_equal_scores_tie_break_by_id() {
        let docs = Document::from_chunks(&[
            Chunk::new("alpha beta", Metadata::new()),
            Chunk::new("alpha beta", Metadata::new()),
            Chunk::new("gamma", Metadata::new()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteSparseIndex::build(dir.path().join("en.db"), &docs, en()).unwrap();

        let hits = index.search("alpha", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, DocId::from("doc_0"));
        assert_eq!(hits[1].doc_id, DocId::from("doc_1"));
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[tokio::test]
    async fn test_bm25_parameters_change_scores() {
        let docs = Document::from_chunks(&[
            Chunk::new("rust rust rust rust", Metadata::new()),
            Chunk::new("rust and many other unrelated words here", Metadata::new()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        SqliteSparseIndex::build(&path, &docs, en()).unwrap();

        // k1 = 0 ignores term frequency and b = 0 ignores length: equal scores
        let flat = SqliteSparseIndex::open(&path, en().with_bm25(0.0, 0.0)).unwrap();
        let hits = flat.search("rust", 10).await.unwrap();
        assert!((hits[0].score - hits[1].score).abs() < 1e-12);

        let default = SqliteSparseIndex::open(&path, en()).unwrap();
        let hits = default.search("rust", 10).await.unwrap();
        assert_eq!(hits[0].doc_id, DocId::from("doc_0"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_existing_index_is_loaded_not_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        SqliteSparseIndex::build(&path, &corpus(), en()).unwrap();

        // Different input at the same identity: the stored index is served
        let other =
            Document::from_chunks(&[Chunk::new("completely different text", Metadata::new())]);
        let index = SqliteSparseIndex::build(&path, &other, en()).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.resident_len(), 0);
        assert!(index.search("different", 10).await.unwrap().is_empty());
        assert_eq!(index.search("gardening", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fast_path_matches_stored_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        let docs = corpus();
        let built = SqliteSparseIndex::build(&path, &docs, en()).unwrap();
        assert_eq!(built.resident_len(), docs.len());

        let cold = SqliteSparseIndex::open(&path, en()).unwrap();
        assert_eq!(cold.resident_len(), 0);

        for doc in &docs {
            let fast = built.fetch(&doc.id).await.unwrap().unwrap();
            let stored = built.fetch_stored(&doc.id).unwrap().unwrap();
            let reopened = cold.fetch(&doc.id).await.unwrap().unwrap();
            assert_eq!(&fast, doc);
            assert_eq!(fast, stored);
            assert_eq!(fast, reopened);
        }

        assert!(cold.fetch(&DocId::from("doc_99")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_document_unresolvable_warm_and_cold() {
        let docs = Document::from_chunks(&[
            Chunk::new("hello world", Metadata::new()),
            Chunk::new("", Metadata::new()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        let built = SqliteSparseIndex::build(&path, &docs, en()).unwrap();
        assert_eq!(built.resident_len(), 1);

        let cold = SqliteSparseIndex::open(&path, en()).unwrap();
        let empty = DocId::from("doc_1");
        assert!(built.fetch(&empty).await.unwrap().is_none());
        assert!(cold.fetch(&empty).await.unwrap().is_none());

        let warm = built.fetch(&DocId::from("doc_0")).await.unwrap();
        assert_eq!(warm, cold.fetch(&DocId::from("doc_0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_yields_while_scoring() {
        let chunks: Vec<Chunk> = (0..10_000)
            .map(|i| Chunk::new(format!("common term number {}", i), Metadata::new()))
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteSparseIndex::build(
            dir.path().join("en.db"),
            &Document::from_chunks(&chunks),
            en(),
        )
        .unwrap();

        // Scoring runs on the blocking pool, so an expired deadline wins
        let raced = tokio::time::timeout(Duration::ZERO, index.search("common", 10)).await;
        assert!(raced.is_err());

        assert_eq!(index.search("common", 10).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_unresolvable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        SqliteSparseIndex::build(&path, &corpus(), en()).unwrap();

        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE documents SET raw = '{\"id\": \"doc_1\", \"conte' WHERE id = 'doc_1'",
                [],
            )
            .unwrap();
            conn.execute(
                "UPDATE documents SET raw = ?1 WHERE id = 'doc_2'",
                [r#"{"id":"doc_2","contents":"flat only","raw":"{broken"}"#],
            )
            .unwrap();
        }

        let index = SqliteSparseIndex::open(&path, en()).unwrap();
        assert!(index.fetch(&DocId::from("doc_1")).await.unwrap().is_none());

        let flat = index.fetch(&DocId::from("doc_2")).await.unwrap().unwrap();
        assert_eq!(flat.content, "flat only");
        assert!(flat.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_analyzer_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.db");
        SqliteSparseIndex::build(&path, &corpus(), en()).unwrap();

        let err = SqliteSparseIndex::open(&path, SparseParams::new(Language::Zh)).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_chinese_index() {
        let docs = Document::from_chunks(&[
            Chunk::new("北京是中国的首都。", Metadata::new()),
            Chunk::new("上海是一座国际化大都市。", Metadata::new()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteSparseIndex::build(
            dir.path().join("zh.db"),
            &docs,
            SparseParams::new(Language::Zh),
        )
        .unwrap();

        let hits = index.search("中国首都", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, DocId::from("doc_0"));
    }

    #[test]
    fn test_open_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteSparseIndex::open(dir.path().join("missing.db"), en()).is_err());
    }
}
