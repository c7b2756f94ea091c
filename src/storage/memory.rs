//! In-memory store adapters
//!
//! Deterministic substitutes for the Qdrant and SQLite adapters, used by the
//! integration tests and for exercising the sweep loop without external
//! services.

use crate::error::Result;
use crate::storage::{EmbeddingStore, GroundTruthStore, ScanPage};
use crate::types::{EmailId, EmbeddingRecord, Importance, OwnerId};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

/// Embedding store backed by a vector of records
#[derive(Default)]
pub struct MemoryEmbeddingStore {
    records: Mutex<Vec<EmbeddingRecord>>,
}

impl MemoryEmbeddingStore {
    pub fn new(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn insert(&self, record: EmbeddingRecord) {
        self.records.lock().expect("lock poisoned").push(record);
    }
}

#[async_trait]
impl EmbeddingStore for MemoryEmbeddingStore {
    async fn fetch_by_ids(&self, ids: &[EmailId]) -> Result<Vec<EmbeddingRecord>> {
        let records = self.records.lock().expect("lock poisoned");
        Ok(records
            .iter()
            .filter(|r| ids.contains(&r.email_id))
            .cloned()
            .collect())
    }

    async fn scan_all(
        &self,
        cursor: Option<serde_json::Value>,
        limit: usize,
    ) -> Result<ScanPage> {
        let records = self.records.lock().expect("lock poisoned");
        let start = cursor
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(0);
        let end = (start + limit).min(records.len());

        let page: Vec<EmbeddingRecord> = records[start..end].to_vec();
        let next = if end < records.len() {
            Some(json!(end))
        } else {
            None
        };
        Ok(ScanPage { records: page, next })
    }

    async fn filter_by_owner(&self, owner: &OwnerId) -> Result<Vec<EmbeddingRecord>> {
        let records = self.records.lock().expect("lock poisoned");
        Ok(records
            .iter()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect())
    }
}

/// One email row as the relational store sees it
#[derive(Debug, Clone)]
pub struct GroundTruthRow {
    pub owner_id: OwnerId,
    pub importance: Importance,
    pub confidence: Option<f64>,
    pub is_human_labeled: bool,
}

/// Ground-truth store backed by a hash map
#[derive(Default)]
pub struct MemoryGroundTruth {
    rows: Mutex<HashMap<EmailId, GroundTruthRow>>,
}

impl MemoryGroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: EmailId, row: GroundTruthRow) {
        self.rows.lock().expect("lock poisoned").insert(id, row);
    }

    /// Seed an unclassified row for an owner
    pub fn insert_unclassified(&self, id: EmailId, owner: OwnerId) {
        self.insert(
            id,
            GroundTruthRow {
                owner_id: owner,
                importance: Importance::Unclassified,
                confidence: None,
                is_human_labeled: false,
            },
        );
    }

    pub fn row(&self, id: &EmailId) -> Option<GroundTruthRow> {
        self.rows.lock().expect("lock poisoned").get(id).cloned()
    }
}

#[async_trait]
impl GroundTruthStore for MemoryGroundTruth {
    async fn importance_of(&self, ids: &[EmailId]) -> Result<HashMap<EmailId, Importance>> {
        let rows = self.rows.lock().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|row| (id.clone(), row.importance)))
            .collect())
    }

    async fn record_classification(
        &self,
        id: &EmailId,
        importance: Importance,
        confidence: f64,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        match rows.get_mut(id) {
            Some(row) if row.importance == Importance::Unclassified => {
                row.importance = importance;
                row.confidence = Some(confidence);
                row.is_human_labeled = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn human_labeled_count(&self, owner: &OwnerId) -> Result<usize> {
        let rows = self.rows.lock().expect("lock poisoned");
        Ok(rows
            .values()
            .filter(|row| &row.owner_id == owner && row.is_human_labeled)
            .count())
    }
}
