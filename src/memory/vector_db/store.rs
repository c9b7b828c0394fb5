//! Shared, persistent vector index
//!
//! Searches take the read lock and run concurrently. Inserts, saves, source
//! removals and reloads all pass through one write gate, so a snapshot always
//! reflects a single consistent index state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use super::index::{PendingChunk, SearchHit, VectorIndex};
use super::snapshot;
use crate::errors::{RagError, Result};

/// Index shared between ingestion and query paths
#[derive(Debug)]
pub struct IndexStore {
    index: RwLock<VectorIndex>,
    write_gate: Mutex<()>,
    location: PathBuf,
}

impl IndexStore {
    /// Empty store persisted at `location`
    pub fn new(dimension: usize, location: impl Into<PathBuf>) -> Self {
        Self {
            index: RwLock::new(VectorIndex::new(dimension)),
            write_gate: Mutex::new(()),
            location: location.into(),
        }
    }

    /// Load the snapshot at `location`
    ///
    /// Fails with `NotFound` if nothing has been saved there and with
    /// `Dimension` if the snapshot was built by a different embedder.
    pub async fn load(dimension: usize, location: impl Into<PathBuf>) -> Result<Self> {
        let location = location.into();
        let index = snapshot::load(&location).await?;
        check_dimension(dimension, &index)?;

        tracing::info!(
            location = %location.display(),
            chunks = index.len(),
            "Loaded index snapshot"
        );

        Ok(Self {
            index: RwLock::new(index),
            write_gate: Mutex::new(()),
            location,
        })
    }

    /// Load the snapshot if one exists, otherwise start empty
    pub async fn open(dimension: usize, location: impl Into<PathBuf>) -> Result<Self> {
        let location = location.into();
        match Self::load(dimension, location.clone()).await {
            Ok(store) => Ok(store),
            Err(RagError::NotFound(_)) => {
                tracing::info!(location = %location.display(), "No index snapshot; starting empty");
                Ok(Self::new(dimension, location))
            }
            Err(e) => Err(e),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Append embedded chunks
    pub async fn insert(&self, chunks: Vec<PendingChunk>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut index = self.index.write().await;
        index.insert(chunks, embeddings)
    }

    /// Similarity search, optionally restricted to a set of sources
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        let index = self.index.read().await;
        match scope {
            Some(sources) => index.search_scoped(query, k, sources),
            None => index.search(query, k),
        }
    }

    /// Whether any indexed chunk belongs to one of `sources`
    pub async fn contains_any_source(&self, sources: &HashSet<String>) -> bool {
        self.index.read().await.contains_any_source(sources)
    }

    /// Persist the current state to the store's location
    pub async fn save(&self) -> Result<()> {
        self.save_to(&self.location).await
    }

    /// Persist the current state to another location
    pub async fn save_to(&self, location: &Path) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let encoded = {
            let index = self.index.read().await;
            snapshot::encode(&index)?
        };
        snapshot::write(location, encoded).await?;
        tracing::debug!(location = %location.display(), "Saved index snapshot");
        Ok(())
    }

    /// Drop every chunk of one source, reusing the remaining embeddings
    ///
    /// Returns how many chunks were removed.
    pub async fn remove_source(&self, source_id: &str) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let (rebuilt, removed) = self.index.read().await.without_source(source_id);
        if removed == 0 {
            return Err(RagError::NotFound(format!("No indexed chunks from {}", source_id)));
        }
        *self.index.write().await = rebuilt;
        Ok(removed)
    }

    /// Replace the in-memory index with the snapshot on disk
    pub async fn reload(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let dimension = self.index.read().await.dimension();
        let loaded = snapshot::load(&self.location).await?;
        check_dimension(dimension, &loaded)?;
        *self.index.write().await = loaded;
        Ok(())
    }

    pub async fn sources(&self) -> Vec<String> {
        self.index.read().await.sources()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    pub async fn dimension(&self) -> usize {
        self.index.read().await.dimension()
    }
}

fn check_dimension(expected: usize, index: &VectorIndex) -> Result<()> {
    if index.dimension() != expected {
        return Err(RagError::Dimension {
            expected,
            actual: index.dimension(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn chunk(source: &str, text: &str) -> PendingChunk {
        PendingChunk::new(source, text)
    }

    #[tokio::test]
    async fn test_open_missing_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(2, dir.path().join("idx")).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = IndexStore::load(2, dir.path().join("idx")).await;
        assert!(matches!(result, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_other_dimension() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(2, dir.path());
        store.save().await.unwrap();

        let result = IndexStore::load(3, dir.path()).await;
        assert!(matches!(result, Err(RagError::Dimension { expected: 3, actual: 2 })));
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(2, dir.path());
        store
            .insert(vec![chunk("a.txt", "alpha")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        store.save().await.unwrap();

        store
            .insert(vec![chunk("b.txt", "beta")], vec![vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);

        store.reload().await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.sources().await, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_source() {
        let store = IndexStore::new(2, "unused");
        store
            .insert(
                vec![chunk("a.txt", "alpha"), chunk("b.txt", "beta")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();

        assert_eq!(store.remove_source("a.txt").await.unwrap(), 1);
        let hits = store.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "b.txt");

        assert!(matches!(
            store.remove_source("a.txt").await,
            Err(RagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_search_during_insert() {
        let store = Arc::new(IndexStore::new(2, "unused"));
        store
            .insert(vec![chunk("a.txt", "seed")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .insert(vec![chunk("a.txt", &format!("chunk {}", i))], vec![vec![1.0, 0.0]])
                        .await
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let hits = store.search(&[1.0, 0.0], 3, None).await.unwrap();
                        assert!(!hits.is_empty());
                        assert_eq!(hits[0].text, "seed");
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.len().await, 51);
    }
}
