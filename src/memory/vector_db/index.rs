//! Exact nearest-neighbour index over embedded chunks
//!
//! Brute-force cosine similarity. Deterministic: equal scores resolve to the
//! earlier-inserted chunk.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::errors::{RagError, Result};

/// Stored passage with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub embedding: Vec<f32>,
}

/// Chunk text awaiting its embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    pub text: String,
    pub source_id: String,
}

impl PendingChunk {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
        }
    }
}

/// One similarity search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Insertion position
    pub position: usize,
    pub text: String,
    pub source_id: String,
    pub score: f32,
}

/// Append-only vector index with a fixed dimension
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: Vec::new(),
        }
    }

    /// Rebuild from already-embedded chunks, validating every dimension
    pub fn from_chunks(dimension: usize, chunks: Vec<Chunk>) -> Result<Self> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
            return Err(RagError::Dimension {
                expected: dimension,
                actual: bad.embedding.len(),
            });
        }
        Ok(Self { dimension, chunks })
    }

    /// Append chunks; all-or-nothing
    ///
    /// Returns the number of chunks added.
    pub fn insert(&mut self, chunks: Vec<PendingChunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::Configuration(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RagError::Dimension {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let added = chunks.len();
        self.chunks.extend(
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(pending, embedding)| Chunk {
                    text: pending.text,
                    source_id: pending.source_id,
                    embedding,
                }),
        );

        Ok(added)
    }

    /// Top-`k` chunks by cosine similarity, descending
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_where(query, k, |_| true)
    }

    /// Top-`k` restricted to chunks whose source is in `sources`
    pub fn search_scoped(&self, query: &[f32], k: usize, sources: &HashSet<String>) -> Result<Vec<SearchHit>> {
        self.search_where(query, k, |chunk| sources.contains(&chunk.source_id))
    }

    fn search_where<F>(&self, query: &[f32], k: usize, keep: F) -> Result<Vec<SearchHit>>
    where
        F: Fn(&Chunk) -> bool,
    {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(RagError::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| keep(chunk))
            .map(|(i, chunk)| (i, cosine(query, query_norm, &chunk.embedding)))
            .collect();

        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| {
                let chunk = &self.chunks[position];
                SearchHit {
                    position,
                    text: chunk.text.clone(),
                    source_id: chunk.source_id.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Copy of this index without one source's chunks
    ///
    /// Embeddings are reused, so no re-embedding is needed. Returns the
    /// rebuilt index and how many chunks were dropped.
    pub fn without_source(&self, source_id: &str) -> (VectorIndex, usize) {
        let kept: Vec<Chunk> = self
            .chunks
            .iter()
            .filter(|c| c.source_id != source_id)
            .cloned()
            .collect();
        let removed = self.chunks.len() - kept.len();
        (
            VectorIndex {
                dimension: self.dimension,
                chunks: kept,
            },
            removed,
        )
    }

    /// Distinct source ids in insertion order
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .filter(|c| seen.insert(c.source_id.as_str()))
            .map(|c| c.source_id.clone())
            .collect()
    }

    /// Whether any chunk belongs to one of `sources`
    pub fn contains_any_source(&self, sources: &HashSet<String>) -> bool {
        self.chunks.iter().any(|c| sources.contains(&c.source_id))
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    let denom = query_norm * norm(other);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(other).map(|(a, b)| a * b).sum();
    dot / denom
}
