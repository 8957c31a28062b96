//! ONNX-based query encoder.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use hyrag_core::{
    run_blocking, DocumentEncoder, EncoderConfig, Pooling, QueryEncoder, RagError, Result,
};

/// Loaded model state, shared with inference running on the blocking pool.
struct Model {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    tokenizer: Tokenizer,

    dimension: usize,
    max_tokens: usize,
    pooling: Pooling,
    token_type_ids: bool,
}

/// Query encoder backed by an ONNX sentence-embedding model.
///
/// Tokenization and inference run on the blocking thread pool.
pub struct OnnxQueryEncoder {
    model: Arc<Model>,
    query_prefix: String,
}

impl OnnxQueryEncoder {
    /// Load the model and tokenizer named by `config`.
    pub fn from_config(config: &EncoderConfig) -> Result<Self> {
        info!("Loading ONNX model from {:?}", config.model_path);

        let session = Session::builder()
            .map_err(|e| RagError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| RagError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(&config.model_path)
            .map_err(|e| RagError::embedding(format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", config.tokenizer_path);

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| RagError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            "Query encoder initialized: dim={}, max_tokens={}, pooling={:?}",
            config.dimension, config.max_tokens, config.pooling
        );

        Ok(Self {
            model: Arc::new(Model {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension,
                max_tokens: config.max_tokens,
                pooling: config.pooling,
                token_type_ids: config.token_type_ids,
            }),
            query_prefix: config.query_prefix.clone(),
        })
    }

    /// Embed `texts`, each prefixed with `prefix`, off the async runtime.
    async fn embed(&self, texts: &[&str], prefix: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let prefixed: Vec<String> = texts.iter().map(|t| format!("{}{}", prefix, t)).collect();
        run_blocking(move || model.embed_batch(prefixed)).await
    }
}

impl Model {
    /// Embed a batch of already-prefixed texts.
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);
        let batch_size = encodings.len();

        debug!("Encoding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask_tensor = Tensor::from_array((vec![batch_size, max_len], attention_mask))
            .map_err(|e| RagError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = if self.token_type_ids {
            let token_types = vec![0i64; batch_size * max_len];
            let token_type_tensor = Tensor::from_array((vec![batch_size, max_len], token_types))
                .map_err(|e| {
                    RagError::embedding(format!("Failed to create token type tensor: {}", e))
                })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
        }
        .map_err(|e| RagError::embedding(format!("Inference failed: {}", e)))?;

        // First output: either token states (batch, seq, hidden) or pooled (batch, hidden)
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RagError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RagError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape);

        let pooled = match shape.len() {
            3 => self.pool_tokens(&view, &encodings, max_len),
            2 => (0..batch_size)
                .map(|i| (0..shape[1]).map(|j| view[[i, j]]).collect())
                .collect(),
            _ => {
                return Err(RagError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape
                )));
            }
        };

        pooled
            .into_iter()
            .map(|embedding: Vec<f32>| {
                if embedding.len() != self.dimension {
                    return Err(RagError::DimensionMismatch {
                        expected: self.dimension,
                        actual: embedding.len(),
                    });
                }
                Ok(l2_normalize(embedding))
            })
            .collect()
    }

    /// Reduce token states of shape [batch, seq, hidden] to one vector per input.
    fn pool_tokens(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        encodings: &[Encoding],
        max_len: usize,
    ) -> Vec<Vec<f32>> {
        let shape = tensor.shape();
        let seq_len = shape[1];
        let hidden_dim = shape[2];

        encodings
            .iter()
            .enumerate()
            .map(|(i, encoding)| match self.pooling {
                Pooling::Cls => (0..hidden_dim).map(|k| tensor[[i, 0, k]]).collect(),
                Pooling::Mean => {
                    let mask = encoding.get_attention_mask();
                    let mut sum = vec![0.0f32; hidden_dim];
                    let mut count = 0usize;

                    for j in 0..max_len.min(seq_len).min(mask.len()) {
                        if mask[j] == 1 {
                            count += 1;
                            for (k, s) in sum.iter_mut().enumerate() {
                                *s += tensor[[i, j, k]];
                            }
                        }
                    }

                    if count > 0 {
                        sum.iter_mut().for_each(|s| *s /= count as f32);
                    }
                    sum
                }
            })
            .collect()
    }
}

/// L2 normalize a vector.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl QueryEncoder for OnnxQueryEncoder {
    async fn encode(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query], &self.query_prefix)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.model.dimension
    }
}

#[async_trait]
impl DocumentEncoder for OnnxQueryEncoder {
    async fn encode_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, "").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model_is_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = EncoderConfig {
            model_path: dir.path().join("missing.onnx"),
            tokenizer_path: dir.path().join("tokenizer.json"),
            dimension: 8,
            pooling: Pooling::Mean,
            query_prefix: String::new(),
            token_type_ids: false,
            max_tokens: 16,
            num_threads: 1,
        };

        let err = OnnxQueryEncoder::from_config(&config).err().unwrap();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }
}
