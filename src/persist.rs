//! Durable per-owner classifier state
//!
//! Each owner gets a directory under `<data_dir>/models/<owner>` holding
//! three artifacts: the evidence document, the serialized model blob, and a
//! metadata document. Evidence and metadata are always written together;
//! the model blob is absent until the first successful training. Every file
//! is written to a temporary path and renamed into place so a crash never
//! leaves a half-written artifact.

use crate::error::{Result, TriageError};
use crate::types::{LabeledExample, OwnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EVIDENCE_FILE: &str = "evidence.json";
const MODEL_FILE: &str = "model.bin";
const METADATA_FILE: &str = "metadata.json";

/// Evidence document as stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct EvidenceDoc {
    examples: Vec<LabeledExample>,
    count: usize,
    last_updated: DateTime<Utc>,
}

/// Per-owner metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerMetadata {
    pub owner_id: OwnerId,
    pub model_version: String,
    pub last_trained: DateTime<Utc>,
    pub evidence_count: usize,
}

/// Whatever subset of an owner's artifacts exists on disk
#[derive(Debug, Default)]
pub struct PersistedState {
    pub evidence: Vec<LabeledExample>,
    pub metadata: Option<OwnerMetadata>,
    pub model_blob: Option<Vec<u8>>,
}

/// Disk-backed persistence for owner classifier state
#[derive(Debug, Clone)]
pub struct PersistenceLayer {
    models_dir: PathBuf,
}

impl PersistenceLayer {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            models_dir: data_dir.join("models"),
        }
    }

    fn owner_dir(&self, owner: &OwnerId) -> Result<PathBuf> {
        let name = owner.as_str();
        if name.is_empty()
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(TriageError::Persistence(format!(
                "owner id not usable as a directory name: {:?}",
                name
            )));
        }
        Ok(self.models_dir.join(name))
    }

    /// Persist an owner's full state: evidence + metadata always, the model
    /// blob when present. Total-overwrite semantics.
    pub async fn save(
        &self,
        owner: &OwnerId,
        evidence: &[LabeledExample],
        metadata: &OwnerMetadata,
        model_blob: Option<&[u8]>,
    ) -> Result<()> {
        let dir = self.owner_dir(owner)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TriageError::Persistence(format!("create {}: {}", dir.display(), e)))?;

        // Total-overwrite semantics: an absent blob removes any stale model
        // file, otherwise a later hydration would resurrect a discarded
        // model next to fresh evidence.
        match model_blob {
            Some(blob) => write_atomic(&dir.join(MODEL_FILE), blob).await?,
            None => match tokio::fs::remove_file(dir.join(MODEL_FILE)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TriageError::Persistence(format!(
                        "remove stale model for {}: {}",
                        owner, e
                    )))
                }
            },
        }

        let evidence_doc = EvidenceDoc {
            examples: evidence.to_vec(),
            count: evidence.len(),
            last_updated: Utc::now(),
        };
        write_atomic(
            &dir.join(EVIDENCE_FILE),
            &serde_json::to_vec_pretty(&evidence_doc)?,
        )
        .await?;
        write_atomic(
            &dir.join(METADATA_FILE),
            &serde_json::to_vec_pretty(metadata)?,
        )
        .await?;

        debug!(
            "Persisted state for {} ({} evidence entries, model={})",
            owner,
            evidence.len(),
            model_blob.is_some()
        );
        Ok(())
    }

    /// Load whatever artifacts exist for an owner
    ///
    /// Returns `Ok(None)` when the owner has no directory at all. Partial
    /// state (e.g. evidence without a model) is returned as-is; unreadable
    /// individual artifacts are logged and skipped so one corrupt file does
    /// not take the whole owner down.
    pub async fn load(&self, owner: &OwnerId) -> Result<Option<PersistedState>> {
        let dir = self.owner_dir(owner)?;
        if !dir.exists() {
            return Ok(None);
        }

        let mut state = PersistedState::default();

        match tokio::fs::read(dir.join(EVIDENCE_FILE)).await {
            Ok(bytes) => match serde_json::from_slice::<EvidenceDoc>(&bytes) {
                Ok(doc) => state.evidence = doc.examples,
                Err(e) => warn!("Unreadable evidence document for {}: {}", owner, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed reading evidence for {}: {}", owner, e),
        }

        match tokio::fs::read(dir.join(METADATA_FILE)).await {
            Ok(bytes) => match serde_json::from_slice::<OwnerMetadata>(&bytes) {
                Ok(meta) => state.metadata = Some(meta),
                Err(e) => warn!("Unreadable metadata document for {}: {}", owner, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed reading metadata for {}: {}", owner, e),
        }

        match tokio::fs::read(dir.join(MODEL_FILE)).await {
            Ok(bytes) => state.model_blob = Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed reading model blob for {}: {}", owner, e),
        }

        Ok(Some(state))
    }

    /// Remove all artifacts for an owner; no-op when nothing exists
    pub async fn delete(&self, owner: &OwnerId) -> Result<()> {
        let dir = self.owner_dir(owner)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed persisted state for {}", owner);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TriageError::Persistence(format!(
                "remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Enumerate owners with persisted state
    pub async fn list_owners(&self) -> Result<Vec<OwnerId>> {
        let mut owners = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.models_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(owners),
            Err(e) => {
                return Err(TriageError::Persistence(format!(
                    "read {}: {}",
                    self.models_dir.display(),
                    e
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TriageError::Persistence(e.to_string()))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    owners.push(OwnerId::new(name));
                }
            }
        }

        owners.sort();
        Ok(owners)
    }

    /// Whether a model blob exists for the owner
    pub async fn has_model(&self, owner: &OwnerId) -> bool {
        match self.owner_dir(owner) {
            Ok(dir) => dir.join(MODEL_FILE).exists(),
            Err(_) => false,
        }
    }
}

/// Write bytes to a sibling temporary file and atomically rename into place
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| TriageError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| TriageError::Persistence(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}
