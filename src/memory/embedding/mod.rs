//! Text embedding: documents and queries → L2-normalized vectors
//!
//! Two adapters share one trait: a remote OpenAI-compatible endpoint and an
//! in-process BERT model loaded through Candle.

pub mod engine;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{RagError, Result};

pub use engine::LocalEmbedder;
pub use remote::RemoteEmbedder;

/// Maps texts to fixed-dimension unit vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimension, fixed at construction
    fn dimension(&self) -> usize;

    /// Embed a batch; one vector per input, same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| RagError::Embedding {
            message: "embedder returned no vector for query".to_string(),
            failed_inputs: vec![0],
            retryable: false,
        })
    }
}

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Remote,
    Local,
}

/// Token pooling used by the local model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// First token (BGE family)
    Cls,
    /// Attention-masked mean
    Mean,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Base URL of the remote service (`/embeddings` is appended)
    pub base_url: String,
    /// Remote model name or Hugging Face model id
    pub model: String,
    pub api_key: Option<String>,
    /// Expected vector dimension
    pub dimension: usize,
    /// Texts per remote request
    pub batch_size: usize,
    /// Remote requests in flight during ingestion
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub pooling: Pooling,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Remote,
            base_url: "https://api.siliconflow.cn/v1".to_string(),
            model: "BAAI/bge-small-zh-v1.5".to_string(),
            api_key: None,
            dimension: 512,
            batch_size: 32,
            concurrency: num_cpus::get().clamp(1, 4),
            timeout_secs: 60,
            pooling: Pooling::Cls,
        }
    }
}

/// Build the configured embedder
pub async fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Remote => Ok(Arc::new(RemoteEmbedder::new(config)?)),
        EmbeddingProvider::Local => {
            let config = config.clone();
            let embedder = tokio::task::spawn_blocking(move || LocalEmbedder::new(&config))
                .await
                .map_err(|e| RagError::Generic(format!("Task join error: {}", e)))??;
            Ok(Arc::new(embedder))
        }
    }
}

/// Scale a vector to unit length in place; zero vectors are left alone
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
