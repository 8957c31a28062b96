//! Configuration types for hybrid retrieval.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::types::Language;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyragConfig {
    /// Fusion and backend parameters.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Index and cache locations.
    #[serde(default)]
    pub index: IndexConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Query encoder. `None` runs sparse-only.
    #[serde(default)]
    pub encoder: Option<EncoderConfig>,
}

/// Retrieval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Active corpus language.
    #[serde(default = "default_language")]
    pub language: Language,

    /// BM25 term-frequency saturation.
    #[serde(default = "default_sparse_k1")]
    pub sparse_k1: f64,

    /// BM25 length normalization.
    #[serde(default = "default_sparse_b")]
    pub sparse_b: f64,

    /// RRF rank constant.
    #[serde(default = "default_rank_constant")]
    pub rank_constant: u32,

    /// Weight of the sparse ranking in fusion.
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f64,

    /// Weight of the dense ranking in fusion.
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,

    /// Candidates requested from each backend, raised to `top_k` if smaller.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,

    /// Default per-call deadline in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            sparse_k1: 1.2,
            sparse_b: 0.75,
            rank_constant: 60,
            sparse_weight: 0.3,
            dense_weight: 0.7,
            candidate_k: 100,
            deadline_ms: 5000,
        }
    }
}

impl RetrievalConfig {
    /// Candidate pool size for a request of `top_k` results.
    pub fn candidate_k_for(&self, top_k: usize) -> usize {
        self.candidate_k.max(top_k)
    }

    /// Default deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Reject parameter combinations that make fusion meaningless.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("sparse_weight", self.sparse_weight),
            ("dense_weight", self.dense_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RagError::config(format!(
                    "{} must be finite and >= 0, got {}",
                    name, weight
                )));
            }
        }
        if self.sparse_weight == 0.0 && self.dense_weight == 0.0 {
            return Err(RagError::config("sparse_weight and dense_weight cannot both be 0"));
        }
        if self.rank_constant == 0 {
            return Err(RagError::config("rank_constant must be > 0"));
        }
        if self.candidate_k == 0 {
            return Err(RagError::config("candidate_k must be > 0"));
        }
        if !self.sparse_k1.is_finite() || self.sparse_k1 < 0.0 {
            return Err(RagError::config(format!(
                "sparse_k1 must be >= 0, got {}",
                self.sparse_k1
            )));
        }
        if !(0.0..=1.0).contains(&self.sparse_b) {
            return Err(RagError::config(format!(
                "sparse_b must be in [0, 1], got {}",
                self.sparse_b
            )));
        }
        Ok(())
    }
}

/// On-disk locations of indexes and caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root directory for per-language indexes.
    #[serde(default = "default_index_root")]
    pub root: PathBuf,

    /// Chunk cache directory. Defaults to `<root>/chunk_cache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
            cache_dir: None,
        }
    }
}

impl IndexConfig {
    /// Sparse index file for a language.
    pub fn sparse_path(&self, language: Language) -> PathBuf {
        self.root.join(format!("{}_sparse.db", language))
    }

    /// Dense index file for a language.
    pub fn dense_path(&self, language: Language) -> PathBuf {
        self.root.join(format!("{}_dense.db", language))
    }

    /// Chunk cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.root.join("chunk_cache"))
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 500 }
    }
}

/// Pooling applied to token embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// Attention-masked mean over tokens.
    Mean,
    /// First token.
    Cls,
}

/// ONNX query encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to the ONNX model file.
    pub model_path: PathBuf,

    /// Path to tokenizer.json.
    pub tokenizer_path: PathBuf,

    /// Output dimension, checked against the dense index at startup.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_pooling")]
    pub pooling: Pooling,

    /// Prepended to every query before tokenization.
    #[serde(default)]
    pub query_prefix: String,

    /// Feed an all-zero `token_type_ids` input (BERT-style models).
    #[serde(default)]
    pub token_type_ids: bool,

    /// Maximum query length in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

// Default value functions

fn default_language() -> Language {
    Language::En
}

fn default_sparse_k1() -> f64 {
    1.2
}

fn default_sparse_b() -> f64 {
    0.75
}

fn default_rank_constant() -> u32 {
    60
}

fn default_sparse_weight() -> f64 {
    0.3
}

fn default_dense_weight() -> f64 {
    0.7
}

fn default_candidate_k() -> usize {
    100
}

fn default_deadline_ms() -> u64 {
    5000
}

fn default_chunk_size() -> usize {
    500
}

fn default_dimension() -> usize {
    768
}

fn default_pooling() -> Pooling {
    Pooling::Mean
}

fn default_max_tokens() -> usize {
    512
}

fn default_num_threads() -> usize {
    4
}

fn default_index_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hyrag")
}

impl HyragConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| RagError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.retrieval.validate()?;
        Ok(config)
    }
}
