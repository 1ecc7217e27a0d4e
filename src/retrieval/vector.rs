//! Vector store contract and the in-process implementation.
//!
//! Collections hold fixed-dimension dense vectors with text payloads.
//! The in-process store is selected by the `"memory"` vector-store URL;
//! remote stores implement the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::EngineError;

/// A stored chunk: stable id plus its source text payload.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Stable chunk identifier.
    pub id: String,
    /// Chunk text payload.
    pub text: String,
}

impl ChunkRecord {
    /// Creates a record with a fresh id.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }
}

/// Trait for vector store backends.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Upserts vector/payload pairs into a collection, creating it on
    /// first write. All vectors in a collection share one dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when a vector's dimensionality
    /// does not match the collection's.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<(Vec<f32>, ChunkRecord)>,
    ) -> Result<(), EngineError>;

    /// Nearest neighbors by cosine similarity, best first. A missing
    /// collection yields an empty result, not an error.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, EngineError>;

    /// Drops a collection. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, collection: &str) -> Result<(), EngineError>;

    /// Whether a collection exists.
    async fn has_collection(&self, collection: &str) -> bool;

    /// All payloads currently stored in a collection, in insertion order.
    /// Missing collection yields empty.
    async fn payloads(&self, collection: &str) -> Vec<ChunkRecord>;
}

struct Collection {
    dimensions: usize,
    points: Vec<(Vec<f32>, ChunkRecord)>,
}

/// In-process vector store.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVectorStore").finish()
    }
}

/// Cosine similarity between two equal-length vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<(Vec<f32>, ChunkRecord)>,
    ) -> Result<(), EngineError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write().await;
        let dims = points[0].0.len();
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimensions: dims,
                points: Vec::new(),
            });

        for (vector, _) in &points {
            if vector.len() != entry.dimensions {
                return Err(EngineError::Config {
                    message: format!(
                        "dimension mismatch in collection '{collection}': expected {}, got {}",
                        entry.dimensions,
                        vector.len()
                    ),
                });
            }
        }

        entry.points.extend(points);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, EngineError> {
        let collections = self.collections.read().await;
        let Some(entry) = collections.get(collection) else {
            warn!(collection, "search against missing collection");
            return Ok(Vec::new());
        };

        if query.len() != entry.dimensions {
            return Err(EngineError::Config {
                message: format!(
                    "query dimension mismatch for '{collection}': expected {}, got {}",
                    entry.dimensions,
                    query.len()
                ),
            });
        }

        let mut scored: Vec<(f32, &ChunkRecord)> = entry
            .points
            .iter()
            .map(|(vector, record)| (cosine_similarity(query, vector), record))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), EngineError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().await.contains_key(collection)
    }

    async fn payloads(&self, collection: &str) -> Vec<ChunkRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|entry| entry.points.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}
