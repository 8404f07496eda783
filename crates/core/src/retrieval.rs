use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{SearchFilters, SearchHit};
use crate::traits::RecordStore;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum cosine similarity for a vector hit to participate.
    pub similarity_threshold: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    /// Minimum similarity for `similar` results.
    pub similar_floor: f64,
    /// How many candidates to pull from each leg before fusion.
    pub candidate_pool: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.3,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            similar_floor: 0.2,
            candidate_pool: 20,
        }
    }
}

/// Hybrid retrieval over one record store: a vector leg and a keyword
/// leg run concurrently and fuse by weighted sum. A chunk found by both
/// legs outranks one found by either alone.
pub struct RetrievalEngine<S, E>
where
    S: RecordStore,
    E: Embedder,
{
    store: S,
    embedder: E,
    config: RetrievalConfig,
}

struct FusedHit {
    hit: SearchHit,
    vector_score: f64,
    keyword_score: f64,
}

impl<S, E> RetrievalEngine<S, E>
where
    S: RecordStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        let top_k = top_k.unwrap_or(self.config.top_k);

        let query_texts = vec![query.to_string()];
        let query_vector = self
            .embedder
            .embed_batch(&query_texts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Request("embedder returned no vector".to_string()))?;

        let pool = self.config.candidate_pool.max(top_k);
        let (vector_hits, keyword_hits) = tokio::join!(
            self.store.vector_search(&query_vector, pool, filters),
            self.store.keyword_search(query, pool, filters)
        );
        let vector_hits = vector_hits?;
        // A broken keyword leg degrades the query to pure vector results.
        let keyword_hits = match keyword_hits {
            Ok(hits) => hits,
            Err(err) => {
                warn!(query, error = %err, "keyword search failed, continuing vector-only");
                Vec::new()
            }
        };

        let mut fused: HashMap<i64, FusedHit> = HashMap::new();

        for (record, score) in &vector_hits {
            if *score < self.config.similarity_threshold {
                continue;
            }
            fused
                .entry(record.id)
                .or_insert_with(|| FusedHit {
                    hit: SearchHit::from_record(record, 0.0),
                    vector_score: 0.0,
                    keyword_score: 0.0,
                })
                .vector_score = *score;
        }

        // Keyword backends score on open-ended scales; rescale to [0, 1]
        // so the weights mean the same thing for every store.
        let keyword_max = keyword_hits
            .iter()
            .map(|(_, score)| *score)
            .fold(0.0f64, f64::max);
        for (record, score) in &keyword_hits {
            let normalized = if keyword_max > 1.0 {
                score / keyword_max
            } else {
                *score
            };
            fused
                .entry(record.id)
                .or_insert_with(|| FusedHit {
                    hit: SearchHit::from_record(record, 0.0),
                    vector_score: 0.0,
                    keyword_score: 0.0,
                })
                .keyword_score = normalized;
        }

        let mut hits: Vec<SearchHit> = fused
            .into_values()
            .map(|mut entry| {
                entry.hit.score = self.config.vector_weight * entry.vector_score
                    + self.config.keyword_weight * entry.keyword_score;
                entry.hit
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        debug!(
            query,
            vector_candidates = vector_hits.len(),
            keyword_candidates = keyword_hits.len(),
            returned = hits.len(),
            "hybrid search complete"
        );
        Ok(hits)
    }

    /// Chunks most similar to an already-indexed chunk, excluding the
    /// chunk itself.
    pub async fn similar(
        &self,
        chunk_id: i64,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let anchor = self.store.fetch(chunk_id).await?;

        let pool = self.config.candidate_pool.max(top_k + 1);
        let candidates = self
            .store
            .vector_search(&anchor.embedding, pool, &SearchFilters::default())
            .await?;

        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|(record, score)| {
                record.id != chunk_id && *score >= self.config.similar_floor
            })
            .take(top_k)
            .map(|(record, score)| SearchHit::from_record(&record, score))
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::models::{IndexedRecord, RecordDraft};
    use crate::traits::InsertOutcome;
    use async_trait::async_trait;
    use serde_json::Map;

    #[derive(Default)]
    struct FakeStore {
        vector_hits: Vec<(IndexedRecord, f64)>,
        keyword_hits: Vec<(IndexedRecord, f64)>,
        fail_keyword: bool,
    }

    fn record(id: i64, content: &str) -> IndexedRecord {
        IndexedRecord {
            id,
            content: content.to_string(),
            embedding: vec![1.0, 0.0, 0.0, 0.0],
            content_hash: format!("hash-{id}"),
            metadata: Map::new(),
            source_file: "三年级上册语文.pdf".to_string(),
            chunk_index: 0,
            page_number: 1,
            quality_score: 0.8,
        }
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn insert(&self, _draft: RecordDraft) -> Result<InsertOutcome, SearchError> {
            Ok(InsertOutcome::Inserted(1))
        }

        async fn vector_search(
            &self,
            _embedding: &[f32],
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
            Ok(self.vector_hits.clone())
        }

        async fn keyword_search(
            &self,
            _query: &str,
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
            if self.fail_keyword {
                return Err(SearchError::Request("keyword backend down".to_string()));
            }
            Ok(self.keyword_hits.clone())
        }

        async fn fetch(&self, id: i64) -> Result<IndexedRecord, SearchError> {
            self.vector_hits
                .iter()
                .map(|(record, _)| record)
                .find(|record| record.id == id)
                .cloned()
                .ok_or(SearchError::RecordNotFound(id))
        }

        async fn count(&self) -> Result<usize, SearchError> {
            Ok(self.vector_hits.len())
        }
    }

    fn engine(store: FakeStore) -> RetrievalEngine<FakeStore, HashEmbedder> {
        RetrievalEngine::new(
            store,
            HashEmbedder { dimensions: 4 },
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn keyword_only_hits_keep_their_weighted_share() {
        let store = FakeStore {
            vector_hits: Vec::new(),
            keyword_hits: vec![(record(1, "秋天的雨"), 0.8)],
            ..FakeStore::default()
        };

        let hits = engine(store)
            .search("秋天", None, &SearchFilters::default())
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.24).abs() < 1e-9);
    }

    #[tokio::test]
    async fn chunks_found_by_both_legs_outrank_single_leg_hits() {
        let store = FakeStore {
            vector_hits: vec![(record(1, "秋天的雨"), 0.9), (record(2, "花的学校"), 0.9)],
            keyword_hits: vec![(record(1, "秋天的雨"), 1.0)],
            ..FakeStore::default()
        };

        let hits = engine(store)
            .search("秋天", None, &SearchFilters::default())
            .await
            .expect("search");

        assert_eq!(hits[0].chunk_id, 1);
        assert!((hits[0].score - (0.7 * 0.9 + 0.3)).abs() < 1e-9);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn low_similarity_vector_hits_are_dropped() {
        let store = FakeStore {
            vector_hits: vec![(record(1, "秋天的雨"), 0.2)],
            keyword_hits: Vec::new(),
            ..FakeStore::default()
        };

        let hits = engine(store)
            .search("冬天", None, &SearchFilters::default())
            .await
            .expect("search");

        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn open_ended_keyword_scores_are_rescaled() {
        let store = FakeStore {
            vector_hits: Vec::new(),
            keyword_hits: vec![(record(1, "秋天的雨"), 12.0), (record(2, "花的学校"), 6.0)],
            ..FakeStore::default()
        };

        let hits = engine(store)
            .search("秋天", None, &SearchFilters::default())
            .await
            .expect("search");

        assert!((hits[0].score - 0.3).abs() < 1e-9);
        assert!((hits[1].score - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn keyword_backend_failure_degrades_to_vector_results() {
        let store = FakeStore {
            vector_hits: vec![(record(1, "秋天的雨"), 0.9)],
            fail_keyword: true,
            ..FakeStore::default()
        };

        let hits = engine(store)
            .search("秋天", None, &SearchFilters::default())
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.7 * 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_queries_are_rejected() {
        let error = engine(FakeStore::default())
            .search("   ", None, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(error, SearchError::Request(_)));
    }

    #[tokio::test]
    async fn similar_excludes_the_anchor_and_applies_the_floor() {
        let store = FakeStore {
            vector_hits: vec![
                (record(1, "秋天的雨"), 1.0),
                (record(2, "花的学校"), 0.6),
                (record(3, "数学练习"), 0.1),
            ],
            keyword_hits: Vec::new(),
            ..FakeStore::default()
        };

        let hits = engine(store).similar(1, None).await.expect("similar");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 2);
        assert!((hits[0].score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn similar_for_unknown_chunk_errors() {
        let error = engine(FakeStore::default()).similar(99, None).await.unwrap_err();
        assert!(matches!(error, SearchError::RecordNotFound(99)));
    }
}
