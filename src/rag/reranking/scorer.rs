// Cross-encoder re-ranking of retrieved candidates
//
// Scores (query, passage) pairs with a remote rerank endpoint. Re-ranking is
// an enhancement: any failure degrades to the first `top_k` candidates in
// retrieval order.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::errors::{RagError, Result};
use crate::memory::vector_db::SearchHit;

/// Re-ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Full URL of the rerank endpoint
    pub base_url: String,
    pub model: String,
    /// Without a key every call falls back
    pub api_key: Option<String>,
    /// Upper bound on one rerank call
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1/rerank".to_string(),
            model: "BAAI/bge-reranker-v2-m3".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Candidate with its cross-encoder relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub hit: SearchHit,
    pub relevance: f32,
}

/// Why re-ranking was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    MissingCredential,
    Unreachable(String),
    HttpStatus(u16),
    MalformedResponse(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::MissingCredential => write!(f, "no reranker API key configured"),
            FallbackReason::Unreachable(e) => write!(f, "reranker unreachable: {}", e),
            FallbackReason::HttpStatus(code) => write!(f, "reranker returned HTTP {}", code),
            FallbackReason::MalformedResponse(e) => write!(f, "malformed reranker response: {}", e),
        }
    }
}

/// Result of a rerank call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RerankOutcome {
    /// Passages ordered by relevance, best first
    Scored(Vec<ScoredPassage>),
    /// Passages in retrieval order, unscored
    Fallback {
        passages: Vec<SearchHit>,
        reason: FallbackReason,
    },
}

impl RerankOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RerankOutcome::Fallback { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            RerankOutcome::Scored(passages) => passages.len(),
            RerankOutcome::Fallback { passages, .. } => passages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying hits, in outcome order
    pub fn hits(&self) -> Vec<&SearchHit> {
        match self {
            RerankOutcome::Scored(passages) => passages.iter().map(|p| &p.hit).collect(),
            RerankOutcome::Fallback { passages, .. } => passages.iter().collect(),
        }
    }

    /// Flatten to (text, relevance); fallback passages score 0.0
    pub fn into_pairs(self) -> Vec<(String, f32)> {
        match self {
            RerankOutcome::Scored(passages) => passages
                .into_iter()
                .map(|p| (p.hit.text, p.relevance))
                .collect(),
            RerankOutcome::Fallback { passages, .. } => {
                passages.into_iter().map(|hit| (hit.text, 0.0)).collect()
            }
        }
    }
}

/// Re-orders retrieval candidates by relevance to the query
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns at most `top_k` passages; never fails
    async fn rerank(&self, query: &str, candidates: Vec<SearchHit>, top_k: usize) -> RerankOutcome;
}

/// Remote cross-encoder client
#[derive(Debug, Clone)]
pub struct RemoteReranker {
    client: Client,
    config: RerankConfig,
}

impl RemoteReranker {
    pub fn new(config: RerankConfig) -> Result<Self> {
        if config.timeout_secs == 0 {
            return Err(RagError::Configuration(
                "reranker timeout must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RagError::HttpError)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    async fn score(&self, api_key: &str, query: &str, documents: &[&str]) -> std::result::Result<Vec<RerankItem>, FallbackReason> {
        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents,
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FallbackReason::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FallbackReason::HttpStatus(status.as_u16()));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| FallbackReason::MalformedResponse(e.to_string()))?;

        Ok(body.results)
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    async fn rerank(&self, query: &str, candidates: Vec<SearchHit>, top_k: usize) -> RerankOutcome {
        if candidates.is_empty() || top_k == 0 {
            return RerankOutcome::Scored(Vec::new());
        }

        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return fallback(candidates, top_k, FallbackReason::MissingCredential),
        };

        let documents: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let outcome = self.score(api_key, query, &documents).await;

        match outcome.and_then(|items| order_by_relevance(&candidates, items, top_k)) {
            Ok(scored) => {
                tracing::debug!(candidates = candidates.len(), kept = scored.len(), "Re-ranked candidates");
                RerankOutcome::Scored(scored)
            }
            Err(reason) => fallback(candidates, top_k, reason),
        }
    }
}

fn fallback(mut candidates: Vec<SearchHit>, top_k: usize, reason: FallbackReason) -> RerankOutcome {
    tracing::warn!(degraded = true, %reason, "Re-ranking skipped; keeping retrieval order");
    candidates.truncate(top_k);
    RerankOutcome::Fallback {
        passages: candidates,
        reason,
    }
}

/// Map service results back onto candidates, best first
fn order_by_relevance(
    candidates: &[SearchHit],
    mut items: Vec<RerankItem>,
    top_k: usize,
) -> std::result::Result<Vec<ScoredPassage>, FallbackReason> {
    if let Some(bad) = items.iter().find(|item| item.index >= candidates.len()) {
        return Err(FallbackReason::MalformedResponse(format!(
            "result index {} out of range for {} documents",
            bad.index,
            candidates.len()
        )));
    }

    let mut seen = HashSet::with_capacity(items.len());
    if let Some(repeat) = items.iter().find(|item| !seen.insert(item.index)) {
        return Err(FallbackReason::MalformedResponse(format!(
            "result index {} scored more than once",
            repeat.index
        )));
    }

    let expected = top_k.min(candidates.len());
    if items.len() < expected {
        return Err(FallbackReason::MalformedResponse(format!(
            "{} result(s) for {} expected",
            items.len(),
            expected
        )));
    }

    items.sort_by(|a, b| match b.relevance_score.total_cmp(&a.relevance_score) {
        std::cmp::Ordering::Equal => a.index.cmp(&b.index),
        other => other,
    });
    items.truncate(top_k);

    Ok(items
        .into_iter()
        .map(|item| ScoredPassage {
            hit: candidates[item.index].clone(),
            relevance: item.relevance_score,
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(position: usize, text: &str, score: f32) -> SearchHit {
        SearchHit {
            position,
            text: text.to_string(),
            source_id: "law.pdf".to_string(),
            score,
        }
    }

    fn candidates() -> Vec<SearchHit> {
        vec![
            hit(0, "first", 0.9),
            hit(1, "second", 0.8),
            hit(2, "third", 0.7),
            hit(3, "fourth", 0.6),
        ]
    }

    #[test]
    fn test_default_config() {
        let config = RerankConfig::default();
        assert_eq!(config.model, "BAAI/bge-reranker-v2-m3");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = RemoteReranker::new(RerankConfig {
            timeout_secs: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_key_falls_back_in_input_order() {
        let reranker = RemoteReranker::new(RerankConfig::default()).unwrap();
        let outcome = reranker.rerank("penalty", candidates(), 3).await;

        match &outcome {
            RerankOutcome::Fallback { passages, reason } => {
                assert_eq!(*reason, FallbackReason::MissingCredential);
                let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
                assert_eq!(texts, vec!["first", "second", "third"]);
            }
            other => panic!("expected fallback, got {:?}", other),
        }

        let pairs = outcome.into_pairs();
        assert!(pairs.iter().all(|(_, score)| *score == 0.0));
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        let reranker = RemoteReranker::new(RerankConfig {
            base_url: "http://127.0.0.1:9/v1/rerank".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let outcome = reranker.rerank("penalty", candidates(), 10).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let reranker = RemoteReranker::new(RerankConfig::default()).unwrap();
        let outcome = reranker.rerank("penalty", Vec::new(), 3).await;
        assert!(outcome.is_empty());
        assert!(!outcome.is_fallback());
    }

    #[test]
    fn test_order_by_relevance() {
        let body: RerankResponse = serde_json::from_str(
            r#"{"results":[
                {"index":2,"relevance_score":0.95},
                {"index":0,"relevance_score":0.10},
                {"index":3,"relevance_score":0.55},
                {"index":1,"relevance_score":0.55}
            ]}"#,
        )
        .unwrap();

        let scored = order_by_relevance(&candidates(), body.results, 3).unwrap();
        let texts: Vec<&str> = scored.iter().map(|p| p.hit.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "fourth"]);
        assert!(scored.windows(2).all(|w| w[0].relevance >= w[1].relevance));
    }

    #[test]
    fn test_out_of_range_index_is_malformed() {
        let items = vec![RerankItem {
            index: 9,
            relevance_score: 1.0,
        }];
        let result = order_by_relevance(&candidates(), items, 3);
        assert!(matches!(result, Err(FallbackReason::MalformedResponse(_))));
    }

    fn item(index: usize, relevance_score: f32) -> RerankItem {
        RerankItem {
            index,
            relevance_score,
        }
    }

    #[test]
    fn test_repeated_index_is_malformed() {
        let items = vec![item(0, 0.9), item(1, 0.5), item(0, 0.1)];
        let result = order_by_relevance(&candidates(), items, 3);
        assert!(matches!(result, Err(FallbackReason::MalformedResponse(_))));
    }

    #[test]
    fn test_partial_results_are_malformed() {
        let result = order_by_relevance(&candidates(), vec![item(2, 0.8)], 3);
        assert!(matches!(result, Err(FallbackReason::MalformedResponse(_))));
    }

    #[test]
    fn test_fewer_candidates_than_top_k() {
        let two = &candidates()[..2];
        let scored = order_by_relevance(two, vec![item(1, 0.7), item(0, 0.2)], 3).unwrap();
        let texts: Vec<&str> = scored.iter().map(|p| p.hit.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
    }
}
