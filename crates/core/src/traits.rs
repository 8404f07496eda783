use crate::error::SearchError;
use crate::models::{IndexedRecord, RecordDraft, SearchFilters};
use async_trait::async_trait;

/// Result of inserting a record: either a fresh row or the id of an
/// existing row with the same content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Storage backend for indexed chunks: exact-hash deduplicated inserts
/// plus vector and keyword retrieval over the same rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a record unless one with the same content hash exists.
    async fn insert(&self, draft: RecordDraft) -> Result<InsertOutcome, SearchError>;

    /// Nearest records by cosine similarity, most similar first.
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError>;

    /// Records matching the query text, scored in [0, 1], best first.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError>;

    async fn fetch(&self, id: i64) -> Result<IndexedRecord, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;
}
