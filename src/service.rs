//! Classification service
//!
//! The operation surface over the registry, persistence, and the embedding
//! store: training, classification, feedback, labeling, stats, and reset.
//! The HTTP layer in `api` is a thin binding over these methods, and the
//! incremental sweep drives them directly.

use crate::classifier::{user::NO_MODEL_VERSION, ClassifierRegistry};
use crate::config::ClassifierConfig;
use crate::error::{Result, TriageError};
use crate::storage::EmbeddingStore;
use crate::types::{
    ClassificationOutcome, EmailId, LabeledExample, ModelStats, OwnerId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Request to train or update an owner's classifier
#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub owner_id: OwnerId,
    pub labeled_examples: Vec<LabeledExample>,
    /// Discard all existing evidence before adding the new examples
    #[serde(default)]
    pub retrain: bool,
}

#[derive(Debug, Serialize)]
pub struct TrainOutcome {
    pub owner_id: OwnerId,
    pub model_version: String,
    pub examples_count: usize,
    pub emails_found: usize,
}

/// Request to classify a set of emails for an owner
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub owner_id: OwnerId,
    pub email_ids: Vec<EmailId>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub owner_id: OwnerId,
    pub results: Vec<ClassificationOutcome>,
    pub model_version: String,
    pub processed_at: DateTime<Utc>,
}

/// User feedback on a previous classification
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub owner_id: OwnerId,
    pub email_id: EmailId,
    pub actual_label: bool,
    pub predicted_label: bool,
    pub confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct FeedbackOutcome {
    pub owner_id: OwnerId,
    pub evidence_added: bool,
    pub retrained: bool,
}

/// Direct labeling of emails
#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub owner_id: OwnerId,
    pub email_labels: Vec<EmailLabel>,
}

#[derive(Debug, Deserialize)]
pub struct EmailLabel {
    pub email_id: EmailId,
    pub is_important: bool,
}

/// Bulk labeling with separate important/unimportant lists
#[derive(Debug, Deserialize)]
pub struct BulkLabelRequest {
    pub owner_id: OwnerId,
    #[serde(default)]
    pub important_email_ids: Vec<EmailId>,
    #[serde(default)]
    pub unimportant_email_ids: Vec<EmailId>,
}

#[derive(Debug, Serialize)]
pub struct LabelOutcome {
    pub owner_id: OwnerId,
    pub labels_added: usize,
    pub total_examples: usize,
    pub retrained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Summary of one owner's persisted artifacts
#[derive(Debug, Serialize)]
pub struct PersistedOwnerSummary {
    pub owner_id: OwnerId,
    pub examples_count: usize,
    pub model_version: String,
    pub last_trained: DateTime<Utc>,
    pub has_trained_model: bool,
}

#[derive(Debug, Serialize)]
pub struct PersistenceStatus {
    pub saved_owners: Vec<PersistedOwnerSummary>,
    pub total_saved_owners: usize,
    pub loaded_owners: Vec<OwnerId>,
    pub total_loaded_owners: usize,
}

/// The classification service proper
pub struct ClassificationService {
    registry: Arc<ClassifierRegistry>,
    embeddings: Arc<dyn EmbeddingStore>,
    cfg: ClassifierConfig,
}

impl ClassificationService {
    pub fn new(
        registry: Arc<ClassifierRegistry>,
        embeddings: Arc<dyn EmbeddingStore>,
        cfg: ClassifierConfig,
    ) -> Self {
        Self {
            registry,
            embeddings,
            cfg,
        }
    }

    pub fn registry(&self) -> &Arc<ClassifierRegistry> {
        &self.registry
    }

    /// Train or update an owner's classifier
    pub async fn train(&self, request: TrainRequest) -> Result<TrainOutcome> {
        let handle = self.registry.get_or_create(&request.owner_id).await;
        let mut classifier = handle.write().await;

        if request.retrain {
            classifier.clear_evidence();
        }
        let examples_count = request.labeled_examples.len();
        classifier.add_evidence(request.labeled_examples).await?;

        // Resolve embeddings for the whole evidence set, not just the new
        // examples, so earlier evidence keeps contributing rows
        let ids = classifier.evidence_ids();
        let records = self.embeddings.fetch_by_ids(&ids).await?;
        if records.is_empty() {
            return Err(TriageError::UnresolvedReference(format!(
                "no embedding records found for any of {} evidence ids",
                ids.len()
            )));
        }

        classifier.train(&records).await?;

        Ok(TrainOutcome {
            owner_id: request.owner_id,
            model_version: classifier.model_version().to_string(),
            examples_count,
            emails_found: records.len(),
        })
    }

    /// Classify emails for an owner
    ///
    /// Never hard-fails on classifier state: targets that cannot be
    /// classified (untrained owner, unresolved embedding) come back with
    /// the default not-important / zero-confidence entry. Store failures
    /// still propagate.
    pub async fn classify(&self, request: ClassifyRequest) -> Result<ClassifyResponse> {
        let mut results: Vec<ClassificationOutcome> = Vec::new();
        let mut model_version = NO_MODEL_VERSION.to_string();

        if let Some(handle) = self.registry.get(&request.owner_id).await {
            let classifier = handle.read().await;
            model_version = if classifier.has_model() {
                classifier.model_version().to_string()
            } else {
                NO_MODEL_VERSION.to_string()
            };

            if classifier.has_model() {
                let targets = self.embeddings.fetch_by_ids(&request.email_ids).await?;
                if !targets.is_empty() {
                    let reference = self
                        .embeddings
                        .fetch_by_ids(&classifier.evidence_ids())
                        .await?;

                    match classifier.classify(&targets, &reference) {
                        Ok(outcomes) => results.extend(outcomes),
                        Err(e) => {
                            // Degrades to defaults below rather than failing
                            warn!("Classification fell back to defaults for {}: {}", request.owner_id, e);
                        }
                    }
                }
            }
        }

        let classified: HashSet<&EmailId> = results.iter().map(|r| &r.email_id).collect();
        let defaults: Vec<ClassificationOutcome> = request
            .email_ids
            .iter()
            .filter(|id| !classified.contains(id))
            .map(|id| ClassificationOutcome {
                email_id: id.clone(),
                is_important: false,
                confidence: 0.0,
                reasoning: "Model not trained yet - need more labeled examples".to_string(),
            })
            .collect();
        results.extend(defaults);

        Ok(ClassifyResponse {
            owner_id: request.owner_id,
            results,
            model_version,
            processed_at: Utc::now(),
        })
    }

    /// Record feedback; a mismatched prediction becomes new evidence and
    /// may trigger a retrain
    pub async fn feedback(&self, request: FeedbackRequest) -> Result<FeedbackOutcome> {
        let handle = self
            .registry
            .get(&request.owner_id)
            .await
            .ok_or_else(|| TriageError::ClassifierNotFound(request.owner_id.to_string()))?;

        let mut evidence_added = false;
        let mut retrained = false;

        if request.actual_label != request.predicted_label {
            let mut classifier = handle.write().await;
            classifier
                .add_evidence(vec![LabeledExample::new(
                    request.email_id.clone(),
                    request.actual_label,
                )])
                .await?;
            evidence_added = true;

            if classifier.evidence_count() >= self.cfg.retrain_threshold {
                retrained = self.retrain_locked(&mut classifier).await;
            }
        }

        Ok(FeedbackOutcome {
            owner_id: request.owner_id,
            evidence_added,
            retrained,
        })
    }

    /// Label emails directly
    pub async fn label(&self, request: LabelRequest) -> Result<LabelOutcome> {
        let examples: Vec<LabeledExample> = request
            .email_labels
            .into_iter()
            .map(|l| LabeledExample::new(l.email_id, l.is_important))
            .collect();
        self.apply_labels(request.owner_id, examples).await
    }

    /// Bulk-label with separate important and unimportant id lists
    pub async fn bulk_label(&self, request: BulkLabelRequest) -> Result<LabelOutcome> {
        let examples: Vec<LabeledExample> = request
            .important_email_ids
            .into_iter()
            .map(|id| LabeledExample::new(id, true))
            .chain(
                request
                    .unimportant_email_ids
                    .into_iter()
                    .map(|id| LabeledExample::new(id, false)),
            )
            .collect();
        self.apply_labels(request.owner_id, examples).await
    }

    async fn apply_labels(
        &self,
        owner_id: OwnerId,
        examples: Vec<LabeledExample>,
    ) -> Result<LabelOutcome> {
        let handle = self.registry.get_or_create(&owner_id).await;
        let mut classifier = handle.write().await;

        let labels_added = examples.len();
        classifier.add_evidence(examples).await?;

        let mut retrained = false;
        if classifier.evidence_count() >= self.cfg.retrain_threshold {
            retrained = self.retrain_locked(&mut classifier).await;
        }

        Ok(LabelOutcome {
            owner_id,
            labels_added,
            total_examples: classifier.evidence_count(),
            retrained,
            model_version: retrained.then(|| classifier.model_version().to_string()),
        })
    }

    /// Retrain on the full evidence set; failures are logged, not
    /// propagated, since labeling itself already succeeded
    async fn retrain_locked(
        &self,
        classifier: &mut crate::classifier::UserClassifier,
    ) -> bool {
        let ids = classifier.evidence_ids();
        let records = match self.embeddings.fetch_by_ids(&ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Retrain skipped for {}: {}", classifier.owner(), e);
                return false;
            }
        };
        match classifier.train(&records).await {
            Ok(()) => {
                info!(
                    "Retrained {} at {} evidence entries",
                    classifier.owner(),
                    classifier.evidence_count()
                );
                true
            }
            Err(e) => {
                warn!("Retrain failed for {}: {}", classifier.owner(), e);
                false
            }
        }
    }

    /// Statistics for an owner's classifier
    pub async fn stats(&self, owner: &OwnerId) -> Result<ModelStats> {
        let handle = self
            .registry
            .get(owner)
            .await
            .ok_or_else(|| TriageError::ClassifierNotFound(owner.to_string()))?;
        let classifier = handle.read().await;
        Ok(classifier.stats())
    }

    /// Whether an owner has enough evidence for automated classification
    pub async fn is_ready(&self, owner: &OwnerId) -> bool {
        match self.stats(owner).await {
            Ok(stats) => stats.total_examples >= self.cfg.min_evidence,
            Err(_) => false,
        }
    }

    /// Drop an owner's classifier and all persisted artifacts; idempotent
    pub async fn reset(&self, owner: &OwnerId) -> Result<()> {
        self.registry.reset(owner).await
    }

    /// Enumerate persisted and loaded classifier state
    pub async fn persistence_status(&self) -> Result<PersistenceStatus> {
        let persistence = self.registry.persistence();
        let mut saved = Vec::new();

        for owner in persistence.list_owners().await? {
            let Ok(Some(state)) = persistence.load(&owner).await else {
                continue;
            };
            let Some(meta) = state.metadata else {
                continue;
            };
            saved.push(PersistedOwnerSummary {
                owner_id: owner.clone(),
                examples_count: state.evidence.len(),
                model_version: meta.model_version,
                last_trained: meta.last_trained,
                has_trained_model: state.model_blob.is_some(),
            });
        }

        let loaded = self.registry.loaded_owners().await;
        Ok(PersistenceStatus {
            total_saved_owners: saved.len(),
            saved_owners: saved,
            total_loaded_owners: loaded.len(),
            loaded_owners: loaded,
        })
    }
}
