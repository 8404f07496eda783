use crate::error::SearchError;
use crate::models::{IndexedRecord, RecordDraft, SearchFilters};
use crate::traits::{InsertOutcome, RecordStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Default)]
struct Inner {
    records: Vec<IndexedRecord>,
    by_hash: HashMap<String, i64>,
    next_id: i64,
}

/// In-process store backed by plain vectors. Search is a full scan,
/// which is fine at single-textbook scale and keeps tests hermetic.
pub struct MemoryStore {
    dimensions: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, draft: RecordDraft) -> Result<InsertOutcome, SearchError> {
        if draft.embedding.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: draft.embedding.len(),
            });
        }

        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.by_hash.get(&draft.content_hash) {
            return Ok(InsertOutcome::Duplicate(*existing));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_hash.insert(draft.content_hash.clone(), id);
        inner.records.push(IndexedRecord {
            id,
            content: draft.content,
            embedding: draft.embedding,
            content_hash: draft.content_hash,
            metadata: draft.metadata,
            source_file: draft.source_file,
            chunk_index: draft.chunk_index,
            page_number: draft.page_number,
            quality_score: draft.quality_score,
        });
        Ok(InsertOutcome::Inserted(id))
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
        if embedding.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(IndexedRecord, f64)> = inner
            .records
            .iter()
            .filter(|record| filters.matches(&record.metadata))
            .map(|record| {
                let score = cosine_similarity(embedding, &record.embedding);
                (record.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(IndexedRecord, f64)> = inner
            .records
            .iter()
            .filter(|record| filters.matches(&record.metadata))
            .filter_map(|record| {
                let matched = terms
                    .iter()
                    .filter(|term| record.content.contains(**term))
                    .count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f64 / terms.len() as f64;
                Some((record.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn fetch(&self, id: i64) -> Result<IndexedRecord, SearchError> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or(SearchError::RecordNotFound(id))
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let inner = self.inner.read().await;
        Ok(inner.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn draft(content: &str, hash: &str, embedding: Vec<f32>) -> RecordDraft {
        RecordDraft {
            content: content.to_string(),
            embedding,
            content_hash: hash.to_string(),
            metadata: Map::new(),
            source_file: "test.pdf".to_string(),
            chunk_index: 0,
            page_number: 1,
            quality_score: 0.8,
        }
    }

    #[tokio::test]
    async fn duplicate_hashes_return_the_existing_id() {
        let store = MemoryStore::new(3);
        let first = store
            .insert(draft("秋天的雨", "hash-a", vec![1.0, 0.0, 0.0]))
            .await
            .expect("insert");
        let second = store
            .insert(draft("秋天的雨", "hash-a", vec![1.0, 0.0, 0.0]))
            .await
            .expect("insert");

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(second.is_duplicate());
        assert_eq!(first.id(), second.id());
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_insert_is_rejected() {
        let store = MemoryStore::new(3);
        let error = store
            .insert(draft("x", "hash-b", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn vector_search_ranks_self_similarity_first() {
        let store = MemoryStore::new(3);
        store
            .insert(draft("大青树下的小学", "hash-a", vec![1.0, 0.0, 0.0]))
            .await
            .expect("insert");
        store
            .insert(draft("花的学校", "hash-b", vec![0.0, 1.0, 0.0]))
            .await
            .expect("insert");

        let hits = store
            .vector_search(&[1.0, 0.0, 0.0], 2, &SearchFilters::default())
            .await
            .expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "大青树下的小学");
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn keyword_search_scores_term_coverage() {
        let store = MemoryStore::new(3);
        store
            .insert(draft("秋天的雨是一把钥匙", "hash-a", vec![1.0, 0.0, 0.0]))
            .await
            .expect("insert");
        store
            .insert(draft("花的学校", "hash-b", vec![0.0, 1.0, 0.0]))
            .await
            .expect("insert");

        let hits = store
            .keyword_search("秋天 钥匙", 5, &SearchFilters::default())
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn filters_restrict_results_by_metadata() {
        let store = MemoryStore::new(3);
        let mut metadata = Map::new();
        metadata.insert("subject".to_string(), "语文".into());
        let mut tagged = draft("秋天的雨", "hash-a", vec![1.0, 0.0, 0.0]);
        tagged.metadata = metadata;
        store.insert(tagged).await.expect("insert");
        store
            .insert(draft("数学练习", "hash-b", vec![0.9, 0.1, 0.0]))
            .await
            .expect("insert");

        let filters = SearchFilters {
            subject: Some("语文".to_string()),
            ..SearchFilters::default()
        };
        let hits = store
            .vector_search(&[1.0, 0.0, 0.0], 5, &filters)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "秋天的雨");
    }

    #[tokio::test]
    async fn fetch_of_unknown_id_errors() {
        let store = MemoryStore::new(3);
        let error = store.fetch(42).await.unwrap_err();
        assert!(matches!(error, SearchError::RecordNotFound(42)));
    }
}
