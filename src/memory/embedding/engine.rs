// Local embedding engine - BERT-family models via Candle
use anyhow::Context;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use super::{l2_normalize, Embedder, EmbeddingConfig, Pooling};
use crate::errors::{RagError, Result};

/// Longest token sequence fed to the model
const MAX_TOKENS: usize = 512;

/// In-process embedding engine
pub struct LocalEmbedder {
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    pooling: Pooling,
    dimension: usize,
}

impl LocalEmbedder {
    /// Create new embedding engine (downloads model on first use)
    ///
    /// Blocking: call from a blocking context.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(config.model.clone(), RepoType::Model));

        let config_path = repo.get("config.json").context("Failed to download model config")?;
        let tokenizer_path = repo.get("tokenizer.json").context("Failed to download tokenizer")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model weights")?;

        let config_contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;
        let bert_config: Config =
            serde_json::from_str(&config_contents).context("Failed to parse model config")?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .context("Failed to load model weights")?
        };
        let model = BertModel::load(vb, &bert_config).context("Failed to create BERT model")?;

        if bert_config.hidden_size != config.dimension {
            return Err(RagError::Dimension {
                expected: config.dimension,
                actual: bert_config.hidden_size,
            });
        }

        tracing::info!(model = %config.model, dimension = config.dimension, "Loaded local embedding model");

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            device,
            pooling: config.pooling,
            dimension: config.dimension,
        })
    }

    /// Generate embeddings for multiple texts (blocking)
    fn embed_blocking(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch_size = texts.len();

        // Pad sequences
        let mut flat_ids = vec![0u32; batch_size * max_len];
        let mut flat_mask = vec![0u32; batch_size * max_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            flat_ids[i * max_len..i * max_len + ids.len()].copy_from_slice(ids);
            flat_mask[i * max_len..i * max_len + mask.len()].copy_from_slice(mask);
        }

        let token_ids = Tensor::from_vec(flat_ids, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(flat_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids = token_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = match self.pooling {
            Pooling::Cls => hidden.narrow(1, 0, 1)?.squeeze(1)?,
            Pooling::Mean => Self::mean_pool(&hidden, &attention_mask)?,
        };

        let mut vectors = pooled.to_vec2::<f32>()?;
        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }
        Ok(vectors)
    }

    /// Mean pooling with attention mask
    fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
        let mask_expanded = attention_mask
            .unsqueeze(2)?
            .expand(embeddings.shape())?
            .to_dtype(embeddings.dtype())?;

        let sum_embeddings = (embeddings * &mask_expanded)?.sum(1)?;
        let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

        Ok(sum_embeddings.broadcast_div(&sum_mask)?)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let engine = Self {
            model: Arc::clone(&self.model),
            tokenizer: Arc::clone(&self.tokenizer),
            device: self.device.clone(),
            pooling: self.pooling,
            dimension: self.dimension,
        };
        let texts = texts.to_vec();
        let count = texts.len();

        tokio::task::spawn_blocking(move || engine.embed_blocking(&texts))
            .await
            .map_err(|e| RagError::Generic(format!("Task join error: {}", e)))?
            .map_err(|e| RagError::Embedding {
                message: e.to_string(),
                failed_inputs: (0..count).collect(),
                retryable: false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bge_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: super::super::EmbeddingProvider::Local,
            ..Default::default()
        }
    }

    #[test]
    #[ignore] // Integration test - requires model download
    fn test_embedding_dimension() {
        let engine = LocalEmbedder::new(&bge_config()).expect("Failed to create engine");
        assert_eq!(engine.dimension(), 512);
    }

    #[tokio::test]
    #[ignore] // Integration test - requires model download
    async fn test_embed_is_deterministic_and_normalized() {
        let engine = LocalEmbedder::new(&bge_config()).expect("Failed to create engine");
        let texts = vec!["逾期申报的罚款是多少".to_string()];

        let first = engine.embed(&texts).await.unwrap();
        let second = engine.embed(&texts).await.unwrap();

        let norm: f32 = first[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        for (a, b) in first[0].iter().zip(second[0].iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[tokio::test]
    #[ignore] // Integration test - requires model download
    async fn test_embed_empty_batch() {
        let engine = LocalEmbedder::new(&bge_config()).expect("Failed to create engine");
        let embeddings = engine.embed(&[]).await.expect("Failed to embed empty batch");
        assert!(embeddings.is_empty());
    }
}
