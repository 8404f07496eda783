use crate::error::SearchError;
use crate::models::{IndexedRecord, RecordDraft, SearchFilters};
use crate::traits::{InsertOutcome, RecordStore};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// OpenSearch-backed store. Records live in one index with a
/// `knn_vector` field for similarity search and a `text` field for
/// keyword match; the document `_id` is the content hash, which makes
/// deduplication an existence check.
#[derive(Debug)]
pub struct OpenSearchStore {
    client: Arc<Client>,
    endpoint: String,
    index_name: String,
    dimensions: usize,
}

impl OpenSearchStore {
    pub fn new(
        endpoint: &str,
        index_name: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            dimensions,
        })
    }

    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .head(format!("{}/{}", self.endpoint, self.index_name))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/{}", self.endpoint, self.index_name))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0,
                    "index.knn": true
                },
                "mappings": {
                    "properties": {
                        "record_id": {"type": "long"},
                        "content": {"type": "text"},
                        "content_hash": {"type": "keyword"},
                        "source_file": {"type": "keyword"},
                        "subject": {"type": "keyword"},
                        "grade": {"type": "keyword"},
                        "unit": {"type": "keyword"},
                        "page_number": {"type": "integer"},
                        "chunk_index": {"type": "long"},
                        "quality_score": {"type": "float"},
                        "metadata": {"type": "object", "enabled": false},
                        "embedding": {
                            "type": "knn_vector",
                            "dimension": self.dimensions
                        }
                    }
                }
            }))
            .send()
            .await?;

        if response.status().is_server_error() || response.status().is_client_error() {
            return Err(SearchError::Request(format!(
                "open-search index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<i64>, SearchError> {
        let body = json!({
            "size": 1,
            "query": {"term": {"content_hash": content_hash}}
        });

        let response = self
            .client
            .post(format!("{}/{}/_search", self.endpoint, self.index_name))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        Ok(payload
            .pointer("/hits/hits/0/_source/record_id")
            .and_then(Value::as_i64))
    }

    async fn run_search(
        &self,
        body: Value,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
        let response = self
            .client
            .post(format!("{}/{}/_search", self.endpoint, self.index_name))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        let hits = payload
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            let source = hit.pointer("/_source").cloned().unwrap_or(Value::Null);
            results.push((record_from_source(&source)?, score));
        }
        Ok(results)
    }
}

/// Stable positive record id derived from the leading bytes of the
/// content hash; insert-order counters do not survive index rebuilds.
fn record_id_from_hash(content_hash: &str) -> i64 {
    let mut value = 0u64;
    for byte in content_hash.bytes().take(15) {
        value = value.wrapping_mul(31).wrapping_add(u64::from(byte));
    }
    (value & i64::MAX as u64) as i64
}

fn record_from_source(source: &Value) -> Result<IndexedRecord, SearchError> {
    let text = |key: &str| -> String {
        source
            .pointer(&format!("/{key}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let embedding = source
        .pointer("/embedding")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    let metadata = source
        .pointer("/metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    Ok(IndexedRecord {
        id: source
            .pointer("/record_id")
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        content: text("content"),
        embedding,
        content_hash: text("content_hash"),
        metadata,
        source_file: text("source_file"),
        chunk_index: source
            .pointer("/chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        page_number: source
            .pointer("/page_number")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        quality_score: source
            .pointer("/quality_score")
            .and_then(Value::as_f64)
            .unwrap_or_default(),
    })
}

fn filter_clauses(filters: &SearchFilters) -> Vec<Value> {
    let mut clauses = Vec::new();
    if let Some(subject) = &filters.subject {
        clauses.push(json!({"term": {"subject": subject}}));
    }
    if let Some(grade) = &filters.grade {
        clauses.push(json!({"term": {"grade": grade}}));
    }
    if let Some(unit) = &filters.unit {
        clauses.push(json!({"term": {"unit": unit}}));
    }
    clauses
}

#[async_trait]
impl RecordStore for OpenSearchStore {
    async fn insert(&self, draft: RecordDraft) -> Result<InsertOutcome, SearchError> {
        if draft.embedding.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: draft.embedding.len(),
            });
        }

        if let Some(existing) = self.find_by_hash(&draft.content_hash).await? {
            debug!(hash = %draft.content_hash, "duplicate content hash, skipping insert");
            return Ok(InsertOutcome::Duplicate(existing));
        }

        let record_id = record_id_from_hash(&draft.content_hash);
        let subject = draft
            .metadata
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let grade = draft
            .metadata
            .get("grade")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let unit = draft
            .metadata
            .get("unit")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let response = self
            .client
            .put(format!(
                "{}/{}/_doc/{}?refresh=true",
                self.endpoint, self.index_name, draft.content_hash
            ))
            .json(&json!({
                "record_id": record_id,
                "content": draft.content,
                "content_hash": draft.content_hash,
                "embedding": draft.embedding,
                "metadata": draft.metadata,
                "source_file": draft.source_file,
                "subject": subject,
                "grade": grade,
                "unit": unit,
                "chunk_index": draft.chunk_index,
                "page_number": draft.page_number,
                "quality_score": draft.quality_score,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(InsertOutcome::Inserted(record_id))
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

        let knn = json!({
            "knn": {
                "embedding": {
                    "vector": embedding,
                    "k": limit
                }
            }
        });

        let query = if filters.is_empty() {
            knn
        } else {
            json!({
                "bool": {
                    "must": [knn],
                    "filter": filter_clauses(filters)
                }
            })
        };

        self.run_search(json!({"size": limit, "query": query})).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(IndexedRecord, f64)>, SearchError> {
        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "must": [
                        {"match": {"content": query}}
                    ],
                    "filter": filter_clauses(filters)
                }
            }
        });

        self.run_search(body).await
    }

    async fn fetch(&self, id: i64) -> Result<IndexedRecord, SearchError> {
        let body = json!({
            "size": 1,
            "query": {"term": {"record_id": id}}
        });

        let mut results = self.run_search(body).await?;
        if results.is_empty() {
            return Err(SearchError::RecordNotFound(id));
        }
        Ok(results.remove(0).0)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .get(format!("{}/{}/_count", self.endpoint, self.index_name))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        Ok(payload
            .pointer("/count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoints_are_validated_and_normalized() {
        let store = OpenSearchStore::new("http://localhost:9200/", "chunks", 4)
            .expect("valid endpoint");
        assert_eq!(store.endpoint, "http://localhost:9200");

        let error = OpenSearchStore::new("not a url", "chunks", 4).unwrap_err();
        assert!(matches!(error, SearchError::Url(_)));
    }

    #[test]
    fn record_ids_are_stable_and_positive() {
        let first = record_id_from_hash("abcdef0123456789");
        let second = record_id_from_hash("abcdef0123456789");
        assert_eq!(first, second);
        assert!(first >= 0);
        assert_ne!(first, record_id_from_hash("fedcba9876543210"));
    }

    #[test]
    fn sources_round_trip_into_records() {
        let source = json!({
            "record_id": 7,
            "content": "秋天的雨",
            "content_hash": "abc",
            "embedding": [0.5, 0.5],
            "metadata": {"subject": "语文"},
            "source_file": "三年级上册语文.pdf",
            "chunk_index": 2,
            "page_number": 27,
            "quality_score": 0.9
        });

        let record = record_from_source(&source).expect("well-formed source");
        assert_eq!(record.id, 7);
        assert_eq!(record.content, "秋天的雨");
        assert_eq!(record.embedding, vec![0.5, 0.5]);
        assert_eq!(record.page_number, 27);
        assert_eq!(
            record.metadata.get("subject").and_then(|v| v.as_str()),
            Some("语文")
        );
    }

    #[test]
    fn filter_clauses_cover_each_set_field() {
        let filters = SearchFilters {
            subject: Some("语文".to_string()),
            grade: Some("三年级上册".to_string()),
            unit: None,
        };
        let clauses = filter_clauses(&filters);
        assert_eq!(clauses.len(), 2);
    }
}
