//! Qdrant embedding store adapter
//!
//! Talks to Qdrant's HTTP API using the scroll endpoint for paginated scans
//! and payload filters for id and owner lookups. Email ids and owner ids
//! live in the point payload under `emailId` / `userId`, the layout written
//! by the embedding pipeline.

use crate::error::{Result, TriageError};
use crate::storage::{EmbeddingStore, ScanPage};
use crate::types::{EmailId, EmbeddingMetadata, EmbeddingRecord, OwnerId};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Qdrant HTTP client scoped to one collection
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
}

#[derive(Serialize)]
struct ScrollRequest {
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

impl QdrantStore {
    pub fn new(base_url: &str, collection: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        })
    }

    async fn scroll(&self, request: &ScrollRequest) -> Result<ScrollResult> {
        let url = format!(
            "{}/collections/{}/points/scroll",
            self.base_url, self.collection
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TriageError::StoreUnavailable(format!("qdrant scroll: {}", e)))?;

        if !response.status().is_success() {
            return Err(TriageError::StoreUnavailable(format!(
                "qdrant scroll returned {}",
                response.status()
            )));
        }

        let body: ScrollResponse = response.json().await?;
        Ok(body.result)
    }

    /// Convert a scroll point into an embedding record
    ///
    /// Points without an `emailId` or `userId` payload entry cannot be
    /// attributed and are skipped.
    fn point_to_record(point: ScrollPoint) -> Option<EmbeddingRecord> {
        let email_id = point.payload.get("emailId")?.as_str()?.to_string();
        let owner_id = point.payload.get("userId")?.as_str()?.to_string();

        let metadata = EmbeddingMetadata {
            created_at: point
                .payload
                .get("createdAt")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            embedding_model: point
                .payload
                .get("embeddingModel")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            owner_id: Some(OwnerId::new(owner_id.clone())),
        };

        Some(EmbeddingRecord {
            email_id: EmailId::new(email_id),
            owner_id: OwnerId::new(owner_id),
            embedding: point.vector.unwrap_or_default(),
            metadata,
        })
    }

    fn collect_records(points: Vec<ScrollPoint>) -> Vec<EmbeddingRecord> {
        let total = points.len();
        let records: Vec<EmbeddingRecord> = points
            .into_iter()
            .filter_map(Self::point_to_record)
            .collect();

        if records.len() < total {
            warn!(
                "Skipped {} qdrant points without emailId/userId payload",
                total - records.len()
            );
        }
        records
    }
}

#[async_trait]
impl EmbeddingStore for QdrantStore {
    async fn fetch_by_ids(&self, ids: &[EmailId]) -> Result<Vec<EmbeddingRecord>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let id_values: Vec<&str> = ids.iter().map(EmailId::as_str).collect();
        let request = ScrollRequest {
            limit: ids.len(),
            offset: None,
            filter: Some(json!({
                "must": [{ "key": "emailId", "match": { "any": id_values } }]
            })),
            with_payload: true,
            with_vector: true,
        };

        let result = self.scroll(&request).await?;
        let records = Self::collect_records(result.points);
        debug!("Fetched {}/{} embeddings from qdrant", records.len(), ids.len());
        Ok(records)
    }

    async fn scan_all(
        &self,
        cursor: Option<serde_json::Value>,
        limit: usize,
    ) -> Result<ScanPage> {
        let request = ScrollRequest {
            limit,
            offset: cursor,
            filter: None,
            // Vectors are not needed for discovery; payload is enough to
            // attribute records to owners
            with_payload: true,
            with_vector: false,
        };

        let result = self.scroll(&request).await?;
        Ok(ScanPage {
            records: Self::collect_records(result.points),
            next: result.next_page_offset,
        })
    }

    async fn filter_by_owner(&self, owner: &OwnerId) -> Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<serde_json::Value> = None;

        loop {
            let request = ScrollRequest {
                limit: 1000,
                offset: cursor,
                filter: Some(json!({
                    "must": [{ "key": "userId", "match": { "value": owner.as_str() } }]
                })),
                with_payload: true,
                with_vector: true,
            };

            let result = self.scroll(&request).await?;
            records.extend(Self::collect_records(result.points));

            match result.next_page_offset {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(payload: serde_json::Value, vector: Option<Vec<f32>>) -> ScrollPoint {
        ScrollPoint {
            payload: payload.as_object().cloned().unwrap_or_default(),
            vector,
        }
    }

    #[test]
    fn point_conversion_reads_payload_fields() {
        let p = point(
            json!({
                "emailId": "e1",
                "userId": "u1",
                "createdAt": "2024-03-04T10:00:00Z",
                "embeddingModel": "text-embedding-3-small"
            }),
            Some(vec![0.1, 0.2]),
        );

        let record = QdrantStore::point_to_record(p).unwrap();
        assert_eq!(record.email_id, EmailId::from("e1"));
        assert_eq!(record.owner_id, OwnerId::from("u1"));
        assert_eq!(record.embedding, vec![0.1, 0.2]);
        assert_eq!(
            record.metadata.embedding_model.as_deref(),
            Some("text-embedding-3-small")
        );
    }

    #[test]
    fn point_without_ids_is_skipped() {
        let p = point(json!({ "createdAt": "2024-03-04T10:00:00Z" }), None);
        assert!(QdrantStore::point_to_record(p).is_none());

        let records = QdrantStore::collect_records(vec![
            point(json!({"emailId": "e1", "userId": "u1"}), None),
            point(json!({"emailId": "e2"}), None),
        ]);
        assert_eq!(records.len(), 1);
    }
}
