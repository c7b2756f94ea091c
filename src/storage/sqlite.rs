//! SQLite ground-truth store adapter
//!
//! Reads and writes the importance fields of the `emails` table owned by the
//! ingestion pipeline. Connections are pooled and all rusqlite work runs off
//! the async executor via deadpool's interact.

use crate::error::{Result, TriageError};
use crate::storage::GroundTruthStore;
use crate::types::{EmailId, Importance, OwnerId};
use async_trait::async_trait;
use deadpool_sqlite::{Config as PoolConfig, Pool, Runtime};
use rusqlite::params;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Pooled SQLite client for the email ground-truth database
pub struct SqliteGroundTruth {
    pool: Pool,
}

impl SqliteGroundTruth {
    /// Open (or create) the database at the given path
    pub fn new(db_path: &Path) -> Result<Self> {
        info!("Opening ground-truth database: {}", db_path.display());

        let pool = PoolConfig::new(db_path)
            .create_pool(Runtime::Tokio1)
            .map_err(|e| TriageError::StoreUnavailable(format!("sqlite pool: {}", e)))?;

        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| TriageError::StoreUnavailable(format!("sqlite: {}", e)))?;

        conn.interact(f)
            .await
            .map_err(|e| TriageError::StoreUnavailable(format!("sqlite interact: {}", e)))?
            .map_err(|e| TriageError::StoreUnavailable(format!("sqlite query: {}", e)))
    }
}

#[async_trait]
impl GroundTruthStore for SqliteGroundTruth {
    async fn importance_of(&self, ids: &[EmailId]) -> Result<HashMap<EmailId, Importance>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let owned: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; owned.len()].join(",");
            let sql = format!(
                "SELECT id, importance FROM emails WHERE id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(owned.iter()), |row| {
                let id: String = row.get(0)?;
                let importance: Option<String> = row.get(1)?;
                Ok((EmailId::new(id), Importance::from_stored(importance.as_deref())))
            })?;
            rows.collect::<rusqlite::Result<HashMap<_, _>>>()
        })
        .await
    }

    async fn record_classification(
        &self,
        id: &EmailId,
        importance: Importance,
        confidence: f64,
    ) -> Result<bool> {
        let email_id = id.0.clone();
        let updated = self
            .with_conn(move |conn| {
                // The WHERE clause is what guarantees human labels are never
                // regressed: only unclassified rows can transition.
                conn.execute(
                    "UPDATE emails
                     SET importance = ?1, importance_confidence = ?2, user_labeled = 0
                     WHERE id = ?3
                       AND (importance IS NULL OR importance = 'unclassified')",
                    params![importance.as_str(), confidence, email_id],
                )
            })
            .await?;

        debug!(
            "Recorded classification for {}: {} ({:.3}), updated={}",
            id, importance, confidence, updated
        );
        Ok(updated > 0)
    }

    async fn human_labeled_count(&self, owner: &OwnerId) -> Result<usize> {
        let owner_id = owner.0.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM emails WHERE user_id = ?1 AND user_labeled = 1",
                params![owner_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}
