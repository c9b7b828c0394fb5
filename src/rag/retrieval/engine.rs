// Retrieval engine: query embedding + similarity search
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::{RagError, Result};
use crate::memory::embedding::Embedder;
use crate::memory::vector_db::{IndexStore, SearchHit};

/// What to do when a knowledge-base scope matches no indexed source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// Search the whole index and flag the result
    #[default]
    FallbackToFullIndex,
    /// Reject the query with `ScopeNotFound`
    Fail,
}

/// Candidates for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    /// Best first
    pub hits: Vec<SearchHit>,
    /// The requested scope was ignored
    pub scope_fallback: bool,
}

/// Retrieval engine for semantic search
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<IndexStore>,
    scope_policy: ScopePolicy,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<IndexStore>, scope_policy: ScopePolicy) -> Self {
        Self {
            embedder,
            store,
            scope_policy,
        }
    }

    /// Retrieve up to `k` candidates, optionally restricted to `scope` sources
    pub async fn retrieve(&self, query: &str, k: usize, scope: Option<&HashSet<String>>) -> Result<Retrieval> {
        let scope = scope.filter(|s| !s.is_empty());

        let (scope, scope_fallback) = match scope {
            Some(sources) if !self.store.contains_any_source(sources).await => match self.scope_policy {
                ScopePolicy::Fail => {
                    return Err(RagError::ScopeNotFound {
                        requested: sources.len(),
                    })
                }
                ScopePolicy::FallbackToFullIndex => {
                    tracing::warn!(
                        degraded = true,
                        requested = sources.len(),
                        "Scope matches no indexed source; searching full index"
                    );
                    (None, true)
                }
            },
            other => (other, false),
        };

        if self.store.is_empty().await {
            return Ok(Retrieval {
                hits: Vec::new(),
                scope_fallback,
            });
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let hits = self.store.search(&query_vector, k, scope).await?;

        tracing::debug!(candidates = hits.len(), scoped = scope.is_some(), "Retrieved candidates");

        Ok(Retrieval { hits, scope_fallback })
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn scope_policy(&self) -> ScopePolicy {
        self.scope_policy
    }
}
