//! Building and opening backends from configuration.
//!
//! Builds are one-time: an index that already exists at its configured path
//! is loaded as-is. Callers finish building before serving queries.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use hyrag_chunk::{chunk_documents, CacheKey, ChunkCache, RecursiveChunker, SourceDocument};
use hyrag_core::{Chunk, ChunkConfig, Document, DocumentEncoder, HyragConfig, RagError, Result};
use hyrag_embed::OnnxQueryEncoder;
use hyrag_store::{Metric, SparseParams, SqliteDenseIndex, SqliteSparseIndex};

use crate::engine::FusionEngine;
use crate::registry::{BackendBundle, BackendRegistry};

/// Documents encoded per call while building a dense index.
const ENCODE_BATCH: usize = 32;

/// Chunk `documents` for the configured language, through the chunk cache.
pub fn prepare_chunks(config: &HyragConfig, documents: &[SourceDocument]) -> Result<Vec<Chunk>> {
    let language = config.retrieval.language;
    let chunk_config = ChunkConfig::with_size(config.chunking.chunk_size);
    let cache = ChunkCache::new(config.index.cache_dir());

    cache.load_or_build(&CacheKey::new(language, chunk_config.chunk_size), || {
        Ok(chunk_documents(&RecursiveChunker::new(), documents, language, &chunk_config))
    })
}

/// Build or load the backends for the configured language.
///
/// A backend that cannot be built or opened is left out of the bundle. If
/// the sparse index is the one missing, the dense index resolves documents.
pub async fn build_bundle<E>(
    config: &HyragConfig,
    chunks: &[Chunk],
    encoder: Option<Arc<E>>,
) -> Result<BackendBundle>
where
    E: DocumentEncoder + 'static,
{
    let language = config.retrieval.language;
    let documents = Document::from_chunks(chunks);

    let params = SparseParams::new(language)
        .with_bm25(config.retrieval.sparse_k1, config.retrieval.sparse_b);
    let sparse = SqliteSparseIndex::build(config.index.sparse_path(language), &documents, params)
        .map(Arc::new);

    let dense = match encoder {
        Some(encoder) => {
            let path = config.index.dense_path(language);
            Some(build_dense(&path, &documents, encoder).await)
        }
        None => {
            info!("No query encoder configured for {}; running sparse-only", language);
            None
        }
    };

    let mut builder = BackendBundle::builder(language);
    if let (Err(_), Some(Ok((index, _)))) = (&sparse, &dense) {
        builder = builder.store(index.clone());
    }
    builder = builder.sparse_result(sparse);
    if let Some(dense) = dense {
        builder = builder.dense_result(dense);
    }

    builder.build()
}

async fn build_dense<E>(
    path: &Path,
    documents: &[Document],
    encoder: Arc<E>,
) -> Result<(Arc<SqliteDenseIndex>, Arc<E>)>
where
    E: DocumentEncoder + 'static,
{
    if path.exists() {
        let index = SqliteDenseIndex::build(path, documents, &[], Metric::default())?;
        return Ok((Arc::new(index), encoder));
    }

    if documents.is_empty() {
        return Err(RagError::embedding("No documents to embed"));
    }

    info!("Encoding {} documents for the dense index", documents.len());
    let mut embeddings = Vec::with_capacity(documents.len());
    for batch in documents.chunks(ENCODE_BATCH) {
        let texts: Vec<&str> = batch.iter().map(|d| d.content.as_str()).collect();
        embeddings.extend(encoder.encode_documents(&texts).await?);
    }

    let index = SqliteDenseIndex::build(path, documents, &embeddings, Metric::default())?;
    Ok((Arc::new(index), encoder))
}

/// Build the backends from `config` and return an engine over them.
///
/// The ONNX encoder named in `config.encoder` is loaded here. If it fails to
/// load, the engine runs sparse-only.
pub async fn open_engine(config: &HyragConfig, chunks: &[Chunk]) -> Result<FusionEngine> {
    let encoder = match &config.encoder {
        Some(encoder_config) => match OnnxQueryEncoder::from_config(encoder_config) {
            Ok(encoder) => Some(Arc::new(encoder)),
            Err(e) => {
                warn!("Query encoder unavailable, dense retrieval disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let bundle = build_bundle(config, chunks, encoder).await?;

    let mut registry = BackendRegistry::new();
    registry.register(bundle);
    FusionEngine::new(&registry, config.retrieval.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyrag_core::{Backend, Language};
    use hyrag_embed::MockEncoder;

    fn config(root: &Path) -> HyragConfig {
        let mut config = HyragConfig::default();
        config.index.root = root.to_path_buf();
        config
    }

    fn corpus() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new(
                "Rust guarantees memory safety without a garbage collector.",
                Language::En,
            ),
            SourceDocument::new("Tomatoes grow best in full sun.", Language::En),
            SourceDocument::new("北京是中国的首都。", Language::Zh),
        ]
    }

    #[test]
    fn test_prepare_chunks_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let chunks = prepare_chunks(&config, &corpus()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(config.index.cache_dir().join("chunks_en_500.json").is_file());

        // Served from the cache even though the input changed
        let again = prepare_chunks(&config, &[]).unwrap();
        assert_eq!(again, chunks);
    }

    #[tokio::test]
    async fn test_build_bundle_hybrid() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let chunks = prepare_chunks(&config, &corpus()).unwrap();

        let bundle = build_bundle(&config, &chunks, Some(Arc::new(MockEncoder::new(32))))
            .await
            .unwrap();
        assert!(bundle.has(Backend::Sparse));
        assert!(bundle.has(Backend::Dense));
        assert!(config.index.sparse_path(Language::En).is_file());
        assert!(config.index.dense_path(Language::En).is_file());
    }

    #[tokio::test]
    async fn test_build_bundle_without_encoder_is_sparse_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let chunks = prepare_chunks(&config, &corpus()).unwrap();

        let bundle = build_bundle::<MockEncoder>(&config, &chunks, None).await.unwrap();
        assert!(bundle.has(Backend::Sparse));
        assert!(!bundle.has(Backend::Dense));
    }

    #[tokio::test]
    async fn test_encoder_dimension_must_match_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let chunks = prepare_chunks(&config, &corpus()).unwrap();

        build_bundle(&config, &chunks, Some(Arc::new(MockEncoder::new(32)))).await.unwrap();
        let err = build_bundle(&config, &chunks, Some(Arc::new(MockEncoder::new(16))))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 32, actual: 16 }));
    }

    #[tokio::test]
    async fn test_corrupt_sparse_index_falls_back_to_dense_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let chunks = prepare_chunks(&config, &corpus()).unwrap();

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(config.index.sparse_path(Language::En), b"not a database").unwrap();

        let bundle = build_bundle(&config, &chunks, Some(Arc::new(MockEncoder::new(32))))
            .await
            .unwrap();
        assert!(!bundle.has(Backend::Sparse));
        assert!(bundle.has(Backend::Dense));

        let doc = bundle.store().fetch(&"doc_0".into()).await.unwrap().unwrap();
        assert!(doc.content.starts_with("Rust guarantees"));
    }

    #[tokio::test]
    async fn test_open_engine_with_missing_model_runs_sparse_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.encoder = Some(hyrag_core::EncoderConfig {
            model_path: dir.path().join("model.onnx"),
            tokenizer_path: dir.path().join("tokenizer.json"),
            dimension: 32,
            pooling: hyrag_core::Pooling::Mean,
            query_prefix: String::new(),
            token_type_ids: false,
            max_tokens: 128,
            num_threads: 1,
        });
        let chunks = prepare_chunks(&config, &corpus()).unwrap();

        let engine = open_engine(&config, &chunks).await.unwrap();
        let hits = engine.search("memory safety", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id.as_str(), "doc_0");
    }
}
