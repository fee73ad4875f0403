//! Paired vector index and chunk metadata with blob-store persistence.
//!
//! The store keeps the [`FlatIndex`] and its metadata list in lockstep: the
//! vector at position n describes `metadata[n]`. Loading is fail-soft (missing
//! or corrupt blobs become an empty store), and incompatible embedding
//! dimensions are never mixed: a stored corpus with the wrong dimension is
//! left on disk but ignored, and a new batch at a different dimension rebuilds
//! the live store.

use std::sync::Arc;

use tracing::{error, warn};

use crate::blobstore::{BlobStore, METADATA_KEY, VECTOR_INDEX_KEY, load_json, save_json};
use crate::error::{IndexError, Result};
use crate::index::{FlatIndex, SearchHit};
use crate::types::MetadataEntry;

pub struct VectorStore {
    blobs: Arc<dyn BlobStore>,
    index: FlatIndex,
    metadata: Vec<MetadataEntry>,
}

impl VectorStore {
    /// Load the store from blobs, or start empty when nothing usable exists.
    ///
    /// A stored index whose dimension differs from `expected_dimension` is
    /// ignored and the store starts empty. Nothing is written back: the blobs
    /// keep the old corpus until the next ingest overwrites them, so a load
    /// under a misconfigured dimension is recoverable. When the index is empty
    /// but metadata survived, the metadata is cleared to restore parity; the
    /// inverse (vectors without metadata) cannot be repaired and is only
    /// reported.
    pub async fn load(blobs: Arc<dyn BlobStore>, expected_dimension: usize) -> Self {
        let index = match blobs.get(VECTOR_INDEX_KEY).await {
            Ok(Some(bytes)) => match FlatIndex::from_bytes(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    error!(error = %e, "Vector index blob is corrupt, starting empty");
                    FlatIndex::new(expected_dimension)
                }
            },
            Ok(None) => FlatIndex::new(expected_dimension),
            Err(e) => {
                error!(error = %e, "Failed to read vector index blob, starting empty");
                FlatIndex::new(expected_dimension)
            }
        };

        if index.dimension() != expected_dimension {
            warn!(
                stored = index.dimension(),
                expected = expected_dimension,
                "Embedding dimension changed, ignoring stored corpus and starting empty"
            );
            return Self {
                blobs,
                index: FlatIndex::new(expected_dimension),
                metadata: Vec::new(),
            };
        }

        let mut metadata: Vec<MetadataEntry> =
            match load_json(blobs.as_ref(), METADATA_KEY).await {
                Ok(Some(entries)) => entries,
                Ok(None) => Vec::new(),
                Err(e) => {
                    error!(error = %e, "Chunk metadata blob is unreadable, starting empty");
                    Vec::new()
                }
            };

        if index.is_empty() && !metadata.is_empty() {
            warn!(
                orphaned = metadata.len(),
                "Vector index is empty but metadata is not; clearing metadata"
            );
            metadata.clear();
        } else if index.len() != metadata.len() {
            error!(
                vectors = index.len(),
                entries = metadata.len(),
                "Vector index and metadata are out of sync; retrieval may return wrong sources"
            );
        }

        Self {
            blobs,
            index,
            metadata,
        }
    }

    /// Number of stored vectors.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Metadata for the vector at `position`, if in range.
    pub fn entry(&self, position: usize) -> Option<&MetadataEntry> {
        self.metadata.get(position)
    }

    /// Append a batch of chunks with their embeddings.
    ///
    /// Every vector in the batch must share one dimension; a ragged batch is
    /// rejected without touching the store. When the batch dimension differs
    /// from the live index, the existing corpus is discarded and the store is
    /// rebuilt from this batch alone.
    pub fn add_batch(
        &mut self,
        batch: Vec<(MetadataEntry, Vec<f32>)>,
    ) -> std::result::Result<(), IndexError> {
        let Some(incoming) = batch.first().map(|(_, v)| v.len()) else {
            return Ok(());
        };
        if let Some((_, ragged)) = batch.iter().find(|(_, v)| v.len() != incoming) {
            return Err(IndexError::DimensionMismatch {
                expected: incoming,
                actual: ragged.len(),
            });
        }

        if incoming != self.index.dimension() {
            warn!(
                have = self.index.dimension(),
                incoming,
                dropped = self.metadata.len(),
                "Embedding dimension changed, rebuilding vector store from this batch"
            );
            self.index = FlatIndex::new(incoming);
            self.metadata.clear();
        }

        for (entry, vector) in batch {
            // Cannot fail: dimensions were checked above.
            self.index.add(&vector)?;
            self.metadata.push(entry);
        }
        Ok(())
    }

    /// Nearest neighbors for `query`. Fail-soft: an empty store or a
    /// wrong-dimension query yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if self.index.is_empty() {
            return Vec::new();
        }
        match self.index.search(query, k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Vector search failed, returning no context");
                Vec::new()
            }
        }
    }

    /// Write both blobs. The index blob is skipped while empty; the metadata
    /// blob is always written so a cleared store stays cleared across restarts.
    pub async fn persist(&self) -> Result<()> {
        if !self.index.is_empty() {
            let bytes = self.index.to_bytes()?;
            self.blobs.put(VECTOR_INDEX_KEY, &bytes).await?;
        }
        save_json(self.blobs.as_ref(), METADATA_KEY, &self.metadata).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, content: &str) -> MetadataEntry {
        MetadataEntry {
            file_name: name.to_string(),
            content: content.to_string(),
            is_image_description: false,
            original_file_extension: "txt".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_from_empty_store() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = VectorStore::load(blobs, 4).await;
        assert_eq!(store.count(), 0);
        assert_eq!(store.dimension(), 4);
        assert!(store.search(&[0.0; 4], 3).is_empty());
    }

    #[tokio::test]
    async fn test_add_persist_reload_roundtrip() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut store = VectorStore::load(blobs.clone(), 2).await;

        store
            .add_batch(vec![
                (entry("sop_17.txt", "Gowning procedure"), vec![1.0, 0.0]),
                (entry("sop_17.txt", "Line clearance"), vec![0.0, 1.0]),
            ])
            .unwrap();
        store.persist().await.unwrap();

        let reloaded = VectorStore::load(blobs, 2).await;
        assert_eq!(reloaded.count(), 2);
        let hits = reloaded.search(&[0.0, 0.9], 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(
            reloaded.entry(hits[0].id).unwrap().content,
            "Line clearance"
        );
    }

    #[tokio::test]
    async fn test_persist_skips_empty_index_blob() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = VectorStore::load(blobs.clone(), 2).await;
        store.persist().await.unwrap();

        assert!(!blobs.exists(VECTOR_INDEX_KEY).await.unwrap());
        assert!(blobs.exists(METADATA_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_dimension_change_on_load_leaves_blobs_untouched() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut store = VectorStore::load(blobs.clone(), 2).await;
        store
            .add_batch(vec![(entry("a.txt", "old corpus"), vec![1.0, 2.0])])
            .unwrap();
        store.persist().await.unwrap();

        // Same blobs, new configured dimension: the live store starts empty.
        let reloaded = VectorStore::load(blobs.clone(), 3).await;
        assert_eq!(reloaded.count(), 0);
        assert_eq!(reloaded.dimension(), 3);

        // Nothing was written back, so loading with the original dimension
        // still finds the corpus and its metadata.
        let recovered = VectorStore::load(blobs, 2).await;
        assert_eq!(recovered.count(), 1);
        assert_eq!(recovered.entry(0).unwrap().content, "old corpus");
    }

    #[tokio::test]
    async fn test_add_batch_dimension_change_rebuilds_from_batch() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut store = VectorStore::load(blobs, 2).await;
        store
            .add_batch(vec![(entry("old.txt", "old"), vec![1.0, 2.0])])
            .unwrap();

        store
            .add_batch(vec![(entry("new.txt", "new"), vec![1.0, 2.0, 3.0])])
            .unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.dimension(), 3);
        assert_eq!(store.entry(0).unwrap().file_name, "new.txt");
    }

    #[tokio::test]
    async fn test_add_batch_rejects_ragged_vectors() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut store = VectorStore::load(blobs, 2).await;
        let err = store
            .add_batch(vec![
                (entry("a.txt", "one"), vec![1.0, 2.0]),
                (entry("a.txt", "two"), vec![1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_metadata_is_cleared() {
        let blobs = Arc::new(MemoryBlobStore::new());
        save_json(
            blobs.as_ref(),
            METADATA_KEY,
            &vec![entry("ghost.txt", "no vector backs this")],
        )
        .await
        .unwrap();

        let store = VectorStore::load(blobs, 2).await;
        assert_eq!(store.count(), 0);
        assert!(store.entry(0).is_none());
    }

    #[tokio::test]
    async fn test_metadata_shortfall_is_reported_not_repaired() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut index = FlatIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        blobs
            .put(VECTOR_INDEX_KEY, &index.to_bytes().unwrap())
            .await
            .unwrap();
        save_json(blobs.as_ref(), METADATA_KEY, &vec![entry("only.txt", "one")])
            .await
            .unwrap();

        // Vectors without metadata cannot be reconstructed; the store keeps
        // both sides as-is and search callers skip out-of-range positions.
        let store = VectorStore::load(blobs, 2).await;
        assert_eq!(store.count(), 2);
        assert!(store.entry(0).is_some());
        assert!(store.entry(1).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_starts_empty() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put(METADATA_KEY, b"[{\"file_name\":").await.unwrap();

        let store = VectorStore::load(blobs, 2).await;
        assert_eq!(store.count(), 0);
        assert!(store.entry(0).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_index_starts_empty() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put(VECTOR_INDEX_KEY, &[0xAB, 0xCD]).await.unwrap();

        let store = VectorStore::load(blobs, 2).await;
        assert_eq!(store.count(), 0);
        assert_eq!(store.dimension(), 2);
    }
}
