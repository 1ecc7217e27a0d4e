//! Retrieval index: dense + lexical search fused by reciprocal rank.
//!
//! Wraps the vector backend and the per-collection BM25 indices behind
//! one API. Dense search is cosine nearest-neighbor; hybrid search fuses
//! dense and lexical rankings either by reciprocal rank (RRF) or by
//! intersection with union fallback. Lexical work runs on the blocking
//! pool.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::chunk::split_default;
use super::lexical::{Bm25Index, tokenize};
use super::vector::{ChunkRecord, VectorBackend};
use crate::error::EngineError;
use crate::provider::embedding::EmbeddingProvider;

/// RRF constant preventing top ranks from dominating.
pub const DEFAULT_FUSION_K: usize = 60;

/// Candidate multiplier for RRF fusion (each side fetches `3k`).
const RRF_CANDIDATE_FACTOR: usize = 3;
/// Candidate multiplier for intersection fusion (each side fetches `5k`).
const INTERSECTION_CANDIDATE_FACTOR: usize = 5;

/// Hybrid fusion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridMode {
    /// Reciprocal rank fusion of dense and lexical rankings.
    Rrf,
    /// Intersection of dense and lexical candidates, union fallback.
    Intersection,
}

struct LexicalEntry {
    texts: Vec<String>,
    index: Arc<Bm25Index>,
}

/// Dense + lexical retrieval over named collections.
pub struct RetrievalIndex {
    vectors: Arc<dyn VectorBackend>,
    embeddings: Arc<dyn EmbeddingProvider>,
    lexical: RwLock<HashMap<String, LexicalEntry>>,
}

impl RetrievalIndex {
    /// Creates an index over the given backends.
    #[must_use]
    pub fn new(vectors: Arc<dyn VectorBackend>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            vectors,
            embeddings,
            lexical: RwLock::new(HashMap::new()),
        }
    }

    /// Chunks, embeds, and upserts `texts` into `collection`.
    ///
    /// With `hybrid` set, (re)builds the collection's BM25 index over all
    /// chunks seen so far. Returns the number of chunks written.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures and dimension mismatches.
    pub async fn upsert(
        &self,
        collection: &str,
        texts: &[String],
        hybrid: bool,
    ) -> Result<usize, EngineError> {
        let chunks: Vec<String> = texts.iter().flat_map(|text| split_default(text)).collect();
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = self.embeddings.embed(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(EngineError::Provider {
                provider: "embedding",
                message: format!(
                    "embedding count mismatch: {} chunks, {} vectors",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        let points: Vec<(Vec<f32>, ChunkRecord)> = vectors
            .into_iter()
            .zip(chunks.iter())
            .map(|(vector, text)| (vector, ChunkRecord::new(text.clone())))
            .collect();
        let written = points.len();
        self.vectors.upsert(collection, points).await?;

        if hybrid {
            let mut lexical = self.lexical.write().await;
            let all_texts: Vec<String> = match lexical.remove(collection) {
                Some(mut entry) => {
                    entry.texts.extend(chunks);
                    entry.texts
                }
                None => chunks,
            };
            let build_input = all_texts.clone();
            let index = tokio::task::spawn_blocking(move || Bm25Index::build(&build_input))
                .await
                .map_err(|e| EngineError::internal(format!("BM25 build task failed: {e}")))?;
            lexical.insert(
                collection.to_string(),
                LexicalEntry {
                    texts: all_texts,
                    index: Arc::new(index),
                },
            );
            debug!(collection, chunks = written, "upserted chunks (vector + BM25)");
        } else {
            debug!(collection, chunks = written, "upserted chunks (vector only)");
        }

        Ok(written)
    }

    /// Dense nearest-neighbor search; top-`k` chunk payloads in rank order.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures and dimension mismatches. A missing
    /// collection yields an empty result.
    pub async fn search_dense(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>, EngineError> {
        let query_vector = self.embeddings.embed_query(query).await?;
        let records = self.vectors.search(collection, &query_vector, k).await?;
        Ok(records.into_iter().map(|r| r.text).collect())
    }

    /// Hybrid search fusing dense and lexical candidates.
    ///
    /// Falls back to dense-only when the collection has no lexical index.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures and dimension mismatches.
    pub async fn search_hybrid(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        fusion_k: usize,
        mode: HybridMode,
    ) -> Result<Vec<String>, EngineError> {
        let factor = match mode {
            HybridMode::Rrf => RRF_CANDIDATE_FACTOR,
            HybridMode::Intersection => INTERSECTION_CANDIDATE_FACTOR,
        };
        let candidates = k.saturating_mul(factor).max(k);

        let query_vector = self.embeddings.embed_query(query).await?;
        let dense: Vec<String> = self
            .vectors
            .search(collection, &query_vector, candidates)
            .await?
            .into_iter()
            .map(|r| r.text)
            .collect();

        let Some((texts, index)) = self.lexical_snapshot(collection).await else {
            warn!(collection, "no lexical index; falling back to dense only");
            return Ok(dense.into_iter().take(k).collect());
        };

        let query_tokens = tokenize(query);
        let ranked = tokio::task::spawn_blocking(move || index.ranked(&query_tokens))
            .await
            .map_err(|e| EngineError::internal(format!("BM25 scoring task failed: {e}")))?;

        let fused = match mode {
            HybridMode::Rrf => {
                let lexical = lexical_ranking_thresholded(&ranked, &texts, candidates);
                debug!(
                    collection,
                    dense = dense.len(),
                    lexical = lexical.len(),
                    "fusing rankings with RRF"
                );
                reciprocal_rank_fusion(&[dense, lexical], fusion_k)
            }
            HybridMode::Intersection => {
                let lexical: Vec<String> = ranked
                    .iter()
                    .take(candidates)
                    .filter_map(|&(idx, _)| texts.get(idx).cloned())
                    .collect();
                intersect_with_union_fallback(&dense, &lexical, k)
            }
        };

        Ok(fused.into_iter().take(k).collect())
    }

    /// Drops a collection's vectors and lexical index.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn drop_collection(&self, collection: &str) -> Result<(), EngineError> {
        self.vectors.drop_collection(collection).await?;
        self.lexical.write().await.remove(collection);
        Ok(())
    }

    /// Drops only the lexical index for a collection.
    pub async fn drop_lexical(&self, collection: &str) {
        self.lexical.write().await.remove(collection);
    }

    /// Whether the vector collection exists.
    pub async fn has_collection(&self, collection: &str) -> bool {
        self.vectors.has_collection(collection).await
    }

    /// All chunk payloads stored in a collection (test and audit hook).
    pub async fn payload_texts(&self, collection: &str) -> Vec<String> {
        self.vectors
            .payloads(collection)
            .await
            .into_iter()
            .map(|r| r.text)
            .collect()
    }

    async fn lexical_snapshot(&self, collection: &str) -> Option<(Vec<String>, Arc<Bm25Index>)> {
        let lexical = self.lexical.read().await;
        lexical
            .get(collection)
            .map(|entry| (entry.texts.clone(), Arc::clone(&entry.index)))
    }
}

impl std::fmt::Debug for RetrievalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalIndex").finish()
    }
}

/// Applies the dynamic noise threshold and returns the surviving lexical
/// ranking: `max(0.2·max_score, 0.5·mean_score, 0.1)`.
fn lexical_ranking_thresholded(
    ranked: &[(usize, f64)],
    texts: &[String],
    limit: usize,
) -> Vec<String> {
    if ranked.is_empty() {
        return Vec::new();
    }
    let max_score = ranked.iter().map(|&(_, s)| s).fold(f64::MIN, f64::max);
    #[allow(clippy::cast_precision_loss)]
    let mean_score = ranked.iter().map(|&(_, s)| s).sum::<f64>() / ranked.len() as f64;
    let threshold = (0.2 * max_score).max(0.5 * mean_score).max(0.1);

    ranked
        .iter()
        .filter(|&&(_, score)| score > threshold)
        .take(limit)
        .filter_map(|&(idx, _)| texts.get(idx).cloned())
        .collect()
}

/// Reciprocal rank fusion over multiple rankings.
///
/// `score(d) = Σ_r 1/(fusion_k + rank_r(d))` with 1-indexed ranks. No
/// score normalization. Ties break by first-seen order so the fusion is
/// deterministic.
#[must_use]
pub fn reciprocal_rank_fusion(rankings: &[Vec<String>], fusion_k: usize) -> Vec<String> {
    let mut scores: HashMap<&str, (f64, usize)> = HashMap::new();
    let mut order = 0usize;

    for ranking in rankings {
        for (rank, doc) in ranking.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = 1.0 / (fusion_k as f64 + rank as f64 + 1.0);
            let entry = scores.entry(doc.as_str()).or_insert_with(|| {
                let seen = order;
                order += 1;
                (0.0, seen)
            });
            entry.0 += contribution;
        }
    }

    let mut fused: Vec<(&str, f64, usize)> = scores
        .into_iter()
        .map(|(doc, (score, seen))| (doc, score, seen))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });

    fused.into_iter().map(|(doc, _, _)| doc.to_string()).collect()
}

/// Intersection of the two candidate lists in dense-rank order; falls
/// back to their union when the intersection is smaller than `k`.
fn intersect_with_union_fallback(dense: &[String], lexical: &[String], k: usize) -> Vec<String> {
    let lexical_set: std::collections::HashSet<&str> =
        lexical.iter().map(String::as_str).collect();
    let common: Vec<String> = dense
        .iter()
        .filter(|doc| lexical_set.contains(doc.as_str()))
        .cloned()
        .collect();

    if common.len() >= k {
        return common;
    }

    debug!(
        common = common.len(),
        k, "intersection too small; falling back to union"
    );
    let mut union = dense.to_vec();
    let dense_set: std::collections::HashSet<&str> = dense.iter().map(String::as_str).collect();
    union.extend(
        lexical
            .iter()
            .filter(|doc| !dense_set.contains(doc.as_str()))
            .cloned(),
    );
    union
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranking(docs: &[&str]) -> Vec<String> {
        docs.iter().map(|d| (*d).to_string()).collect()
    }

    #[test]
    fn test_rrf_prefers_agreement() {
        let fused = reciprocal_rank_fusion(
            &[ranking(&["a", "b", "c"]), ranking(&["b", "a", "d"])],
            DEFAULT_FUSION_K,
        );
        // "a" and "b" each appear in both rankings and beat "c"/"d".
        assert!(fused.iter().position(|d| d == "a") < fused.iter().position(|d| d == "c"));
        assert!(fused.iter().position(|d| d == "b") < fused.iter().position(|d| d == "d"));
    }

    #[test]
    fn test_rrf_single_ranking_preserves_order() {
        let fused = reciprocal_rank_fusion(&[ranking(&["x", "y", "z"])], DEFAULT_FUSION_K);
        assert_eq!(fused, ranking(&["x", "y", "z"]));
    }

    #[test]
    fn test_rrf_empty() {
        assert!(reciprocal_rank_fusion(&[], DEFAULT_FUSION_K).is_empty());
        assert!(reciprocal_rank_fusion(&[Vec::new()], DEFAULT_FUSION_K).is_empty());
    }

    #[test]
    fn test_intersection_fallback_to_union() {
        let dense = ranking(&["a", "b", "c"]);
        let lexical = ranking(&["c", "d"]);
        // Intersection is just "c": smaller than k=2 → union.
        let result = intersect_with_union_fallback(&dense, &lexical, 2);
        assert_eq!(result, ranking(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_intersection_sufficient() {
        let dense = ranking(&["a", "b", "c"]);
        let lexical = ranking(&["b", "a"]);
        let result = intersect_with_union_fallback(&dense, &lexical, 2);
        assert_eq!(result, ranking(&["a", "b"]));
    }

    #[test]
    fn test_lexical_threshold_drops_noise() {
        let texts = ranking(&["top", "middle", "noise"]);
        let ranked = vec![(0usize, 10.0f64), (1, 4.0), (2, 0.05)];
        let surviving = lexical_ranking_thresholded(&ranked, &texts, 10);
        // threshold = max(2.0, ~2.34, 0.1); "noise" and nothing else below it survive.
        assert_eq!(surviving, ranking(&["top", "middle"]));
    }

    proptest! {
        /// Fusion is invariant under re-ordering of the ranking lists.
        #[test]
        fn prop_rrf_idempotent_under_list_reordering(
            a in proptest::collection::vec("[a-f]", 0..6),
            b in proptest::collection::vec("[a-f]", 0..6),
        ) {
            let a: Vec<String> = dedup(a);
            let b: Vec<String> = dedup(b);
            let forward = reciprocal_rank_fusion(&[a.clone(), b.clone()], DEFAULT_FUSION_K);
            let backward = reciprocal_rank_fusion(&[b, a], DEFAULT_FUSION_K);
            // Same score set → same membership; order may differ only
            // between exact ties, which carry equal scores either way.
            let f: std::collections::HashSet<_> = forward.iter().collect();
            let g: std::collections::HashSet<_> = backward.iter().collect();
            prop_assert_eq!(f, g);
        }

        /// If a document outranks another in every input ranking, it
        /// outranks it in the fused output.
        #[test]
        fn prop_rrf_monotone(perm in proptest::sample::subsequence(
            vec!["a", "b", "c", "d", "e"], 2..5)
        ) {
            let docs: Vec<String> = perm.iter().map(|s| (*s).to_string()).collect();
            // Both rankings agree exactly → fused order must match.
            let fused = reciprocal_rank_fusion(
                &[docs.clone(), docs.clone()],
                DEFAULT_FUSION_K,
            );
            prop_assert_eq!(fused, docs);
        }
    }

    fn dedup(items: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        items.into_iter().filter(|i| seen.insert(i.clone())).collect()
    }
}
