//! Storage adapters for the mailtriage system
//!
//! Provides the capability surfaces over the two external stores this core
//! depends on: the vector database holding pre-computed email embeddings and
//! the relational store holding ground-truth importance labels.

pub mod memory;
pub mod qdrant;
pub mod sqlite;

use crate::config::EmbeddingStoreConfig;
use crate::error::{Result, TriageError};
use crate::types::{EmailId, EmbeddingRecord, Importance, OwnerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One page of an embedding store scan
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub records: Vec<EmbeddingRecord>,
    /// Continuation token for the next page; `None` means the scan is done
    pub next: Option<serde_json::Value>,
}

/// Capability surface over the vector database holding email embeddings
///
/// The embedding pipeline owns these records; this trait is strictly
/// read-only.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Fetch records by email id; ids with no record are silently absent
    /// from the result
    async fn fetch_by_ids(&self, ids: &[EmailId]) -> Result<Vec<EmbeddingRecord>>;

    /// Scan all records page by page. Pass `None` to start, then the
    /// returned continuation token until it comes back `None`.
    async fn scan_all(&self, cursor: Option<serde_json::Value>, limit: usize)
        -> Result<ScanPage>;

    /// Fetch all records belonging to one owner
    async fn filter_by_owner(&self, owner: &OwnerId) -> Result<Vec<EmbeddingRecord>>;
}

/// Capability surface over the relational ground-truth store
///
/// Only the importance fields of the email record are read or written here;
/// the rest of the schema belongs to the ingestion pipeline.
#[async_trait]
pub trait GroundTruthStore: Send + Sync {
    /// Current importance of the given ids; ids without a record are absent
    /// from the map
    async fn importance_of(&self, ids: &[EmailId]) -> Result<HashMap<EmailId, Importance>>;

    /// Record an automated classification result. Only transitions
    /// `unclassified -> important|not_important`; returns false when the
    /// record was already classified (or missing) and was left untouched.
    async fn record_classification(
        &self,
        id: &EmailId,
        importance: Importance,
        confidence: f64,
    ) -> Result<bool>;

    /// Number of human-labeled emails for an owner, a readiness signal for
    /// operator visibility
    async fn human_labeled_count(&self, owner: &OwnerId) -> Result<usize>;
}

/// Build the configured embedding store backend
///
/// Backend selection happens once here; call sites only ever see the trait
/// object.
pub fn build_embedding_store(cfg: &EmbeddingStoreConfig) -> Result<Arc<dyn EmbeddingStore>> {
    match cfg.backend.as_str() {
        "qdrant" => Ok(Arc::new(qdrant::QdrantStore::new(
            &cfg.url,
            &cfg.collection,
        )?)),
        other => Err(TriageError::Config(config::ConfigError::Message(format!(
            "unsupported embedding store backend: {}",
            other
        )))),
    }
}
