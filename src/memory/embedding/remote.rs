//! OpenAI-compatible embedding endpoint client
//!
//! Endpoint: POST {base_url}/embeddings with a bearer credential.
//! Inputs are sent in batches; batches may be in flight concurrently and are
//! reassembled in input order.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{l2_normalize, Embedder, EmbeddingConfig};
use crate::errors::{RagError, Result};

/// Remote embedding client
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
    concurrency: usize,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RagError::HttpError)?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Embed one request's worth of inputs; `offset` locates them in the caller's batch
    async fn embed_batch(&self, offset: usize, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let failed = || (offset..offset + batch.len()).collect::<Vec<_>>();

        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| RagError::Embedding {
            message: format!("Failed to reach embedding service: {}", e),
            failed_inputs: failed(),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Embedding {
                message: format!("HTTP {}: {}", status, error_text),
                failed_inputs: failed(),
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| RagError::Embedding {
            message: format!("Malformed embedding response: {}", e),
            failed_inputs: failed(),
            retryable: false,
        })?;

        self.collect_vectors(body, batch.len(), failed)
    }

    /// Order vectors by their reported index and validate shape
    fn collect_vectors(
        &self,
        mut body: EmbeddingResponse,
        expected: usize,
        failed: impl Fn() -> Vec<usize>,
    ) -> Result<Vec<Vec<f32>>> {
        if body.data.len() != expected {
            return Err(RagError::Embedding {
                message: format!(
                    "Embedding service returned {} vectors for {} inputs",
                    body.data.len(),
                    expected
                ),
                failed_inputs: failed(),
                retryable: false,
            });
        }

        body.data.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(expected);
        for item in body.data {
            if item.embedding.len() != self.dimension {
                return Err(RagError::Dimension {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            let mut vector = item.embedding;
            l2_normalize(&mut vector);
            vectors.push(vector);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.batch_size;
        let futures: Vec<_> = texts
            .chunks(batch_size)
            .enumerate()
            .map(|(i, batch)| self.embed_batch(i * batch_size, batch))
            .collect();
        let results: Vec<Result<Vec<Vec<f32>>>> = stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut vectors = Vec::with_capacity(texts.len());
        let mut failed_inputs = Vec::new();
        let mut messages = Vec::new();
        let mut retryable = true;

        for result in results {
            match result {
                Ok(batch) => vectors.extend(batch),
                Err(RagError::Embedding {
                    message,
                    failed_inputs: failed,
                    retryable: batch_retryable,
                }) => {
                    failed_inputs.extend(failed);
                    messages.push(message);
                    retryable &= batch_retryable;
                }
                Err(other) => return Err(other),
            }
        }

        if !failed_inputs.is_empty() {
            return Err(RagError::Embedding {
                message: messages.join("; "),
                failed_inputs,
                retryable,
            });
        }

        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
