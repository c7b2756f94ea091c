//! Per-owner classifier
//!
//! Owns one owner's labeled evidence and trained model, and knows how to
//! persist and restore itself through the persistence layer. All evidence
//! mutation is write-through: the on-disk evidence and metadata documents
//! are rewritten immediately after every change.

use crate::classifier::features::FeatureExtractor;
use crate::classifier::model::{ImportanceModel, ModelParams};
use crate::config::ClassifierConfig;
use crate::error::{Result, TriageError};
use crate::persist::{OwnerMetadata, PersistenceLayer};
use crate::types::{
    ClassificationOutcome, EmbeddingRecord, LabeledExample, ModelStats, OwnerId,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use tracing::{debug, error, info, warn};

/// Version string reported before any model has been trained
pub const NO_MODEL_VERSION: &str = "no_model";

/// Opaque model version token: the short prefix of a fresh v4 uuid
fn new_model_version() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// One owner's evidence, model, and training/classification logic
pub struct UserClassifier {
    owner: OwnerId,
    evidence: Vec<LabeledExample>,
    model: Option<ImportanceModel>,
    model_version: String,
    last_trained: DateTime<Utc>,
    extractor: FeatureExtractor,
    params: ModelParams,
    min_evidence: usize,
    persistence: PersistenceLayer,
    /// Set during reset; a retired classifier refuses mutation and persist
    retired: bool,
}

impl UserClassifier {
    /// Create a brand-new empty classifier for an owner
    pub fn new(owner: OwnerId, cfg: &ClassifierConfig, persistence: PersistenceLayer) -> Self {
        let extractor = FeatureExtractor::new(
            owner.clone(),
            cfg.expected_model_marker.clone(),
            cfg.include_self_in_reference,
        );
        Self {
            owner,
            evidence: Vec::new(),
            model: None,
            model_version: NO_MODEL_VERSION.to_string(),
            last_trained: Utc::now(),
            extractor,
            params: ModelParams {
                trees: cfg.trees,
                max_depth: cfg.max_depth,
                seed: cfg.seed,
            },
            min_evidence: cfg.min_evidence,
            persistence,
            retired: false,
        }
    }

    /// Reconstruct a classifier from whatever persisted artifacts exist
    ///
    /// Never fails the caller: any read or parse problem degrades to an
    /// empty classifier with the cause logged.
    pub async fn hydrate(
        owner: OwnerId,
        cfg: &ClassifierConfig,
        persistence: PersistenceLayer,
    ) -> Self {
        let mut classifier = Self::new(owner.clone(), cfg, persistence.clone());

        let state = match persistence.load(&owner).await {
            Ok(Some(state)) => state,
            Ok(None) => return classifier,
            Err(e) => {
                warn!("Hydration failed for {}, starting empty: {}", owner, e);
                return classifier;
            }
        };

        classifier.evidence = state.evidence;
        if let Some(meta) = state.metadata {
            classifier.model_version = meta.model_version;
            classifier.last_trained = meta.last_trained;
        }
        if let Some(blob) = state.model_blob {
            match bincode::deserialize::<ImportanceModel>(&blob) {
                Ok(model) => classifier.model = Some(model),
                Err(e) => warn!("Unreadable model blob for {}, dropping it: {}", owner, e),
            }
        }

        info!(
            "Hydrated classifier for {} ({} evidence entries, model={})",
            owner,
            classifier.evidence.len(),
            classifier.model.is_some()
        );
        classifier
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    pub fn evidence_ids(&self) -> Vec<crate::types::EmailId> {
        self.evidence.iter().map(|e| e.email_id.clone()).collect()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            owner_id: self.owner.clone(),
            total_examples: self.evidence.len(),
            last_trained: self.last_trained,
            model_version: self.model_version.clone(),
        }
    }

    /// Append evidence (duplicates accumulate by design) and persist
    /// write-through
    pub async fn add_evidence(&mut self, examples: Vec<LabeledExample>) -> Result<()> {
        if self.retired {
            return Err(TriageError::ClassifierNotFound(self.owner.to_string()));
        }
        let added = examples.len();
        self.evidence.extend(examples);
        debug!("Added {} evidence entries for {}", added, self.owner);
        self.persist().await
    }

    /// Drop all evidence and the trained model (the `retrain` flag of the
    /// train operation), returning to the untrained state
    pub fn clear_evidence(&mut self) {
        self.evidence.clear();
        self.model = None;
        self.model_version = NO_MODEL_VERSION.to_string();
        self.last_trained = Utc::now();
    }

    /// Permanently take this classifier out of service
    ///
    /// Called under the write lock during reset. A stale handle obtained
    /// before the reset sees the flag and can no longer mutate or
    /// re-persist anything.
    pub fn retire(&mut self) {
        self.retired = true;
        self.evidence.clear();
        self.model = None;
        self.model_version = NO_MODEL_VERSION.to_string();
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Label each reference record with the evidence label for its email id
    ///
    /// Records with no matching evidence entry are dropped; the first
    /// matching evidence entry wins when duplicates exist.
    fn labeled_references<'a>(
        &self,
        records: &'a [EmbeddingRecord],
    ) -> Vec<(&'a EmbeddingRecord, bool)> {
        records
            .iter()
            .filter_map(|record| {
                self.evidence
                    .iter()
                    .find(|e| e.email_id == record.email_id)
                    .map(|e| (record, e.is_important))
            })
            .collect()
    }

    /// Train the model on the current evidence set
    ///
    /// `records` is the resolved embedding data for the evidence ids;
    /// evidence entries with no matching record are silently dropped. Fails
    /// with `InsufficientData` when fewer than the minimum resolve. On
    /// success the model, version, and timestamp are replaced and the full
    /// state is persisted; on failure in-memory state is untouched beyond
    /// evidence already added.
    pub async fn train(&mut self, records: &[EmbeddingRecord]) -> Result<()> {
        if self.retired {
            return Err(TriageError::ClassifierNotFound(self.owner.to_string()));
        }
        if self.evidence.len() < self.min_evidence {
            return Err(TriageError::InsufficientData(format!(
                "owner {} has {} evidence entries, need {}",
                self.owner,
                self.evidence.len(),
                self.min_evidence
            )));
        }

        let reference = self.labeled_references(records);

        // One feature row per evidence entry that resolves to a record
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for example in &self.evidence {
            let Some(record) = records.iter().find(|r| r.email_id == example.email_id) else {
                continue;
            };
            rows.push(self.extractor.extract(record, &reference));
            labels.push(example.is_important);
        }

        if rows.len() < self.min_evidence {
            return Err(TriageError::InsufficientData(format!(
                "only {} of {} evidence entries resolved to embeddings for {}",
                rows.len(),
                self.evidence.len(),
                self.owner
            )));
        }

        let x = Array2::from_shape_fn((rows.len(), crate::classifier::FEATURE_DIM), |(i, j)| {
            rows[i][j]
        });
        let model = ImportanceModel::fit(&x, &labels, self.params)?;

        self.model = Some(model);
        self.model_version = new_model_version();
        self.last_trained = Utc::now();

        info!(
            "Trained model {} for {} on {} examples",
            self.model_version,
            self.owner,
            rows.len()
        );

        // A failed persist after a successful fit is a durability gap, not
        // a training failure: log loudly and retry once before returning.
        if let Err(e) = self.persist().await {
            error!(
                "Persist after training failed for {} (model {}): {}; retrying",
                self.owner, self.model_version, e
            );
            if let Err(e) = self.persist().await {
                error!(
                    "Persist retry failed for {}; model {} exists only in memory: {}",
                    self.owner, self.model_version, e
                );
            }
        }
        Ok(())
    }

    /// Classify targets against the labeled reference records
    pub fn classify(
        &self,
        targets: &[EmbeddingRecord],
        reference_records: &[EmbeddingRecord],
    ) -> Result<Vec<ClassificationOutcome>> {
        let Some(model) = &self.model else {
            return Err(TriageError::ModelNotTrained(self.owner.to_string()));
        };
        if self.evidence.len() < self.min_evidence {
            return Err(TriageError::InsufficientData(format!(
                "owner {} has {} evidence entries, need {}",
                self.owner,
                self.evidence.len(),
                self.min_evidence
            )));
        }

        let reference = self.labeled_references(reference_records);

        let outcomes = targets
            .iter()
            .map(|target| {
                let features = self.extractor.extract(target, &reference);
                let (is_important, confidence) = model.predict(&features);
                ClassificationOutcome {
                    email_id: target.email_id.clone(),
                    is_important,
                    confidence,
                    reasoning: self.extractor.reasoning(target, is_important, confidence),
                }
            })
            .collect();
        Ok(outcomes)
    }

    /// Rewrite all persisted artifacts for this owner
    pub async fn persist(&self) -> Result<()> {
        if self.retired {
            debug!("Skipping persist for retired classifier {}", self.owner);
            return Ok(());
        }
        let metadata = OwnerMetadata {
            owner_id: self.owner.clone(),
            model_version: self.model_version.clone(),
            last_trained: self.last_trained,
            evidence_count: self.evidence.len(),
        };

        let blob = match &self.model {
            Some(model) => Some(
                bincode::serialize(model)
                    .map_err(|e| TriageError::Persistence(format!("serialize model: {}", e)))?,
            ),
            None => None,
        };

        self.persistence
            .save(&self.owner, &self.evidence, &metadata, blob.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmailId, EmbeddingMetadata};
    use tempfile::TempDir;

    fn record(id: &str, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            email_id: EmailId::from(id),
            owner_id: OwnerId::from("u1"),
            embedding,
            metadata: EmbeddingMetadata {
                created_at: Some("2024-03-04T10:00:00Z".to_string()),
                embedding_model: Some("text-embedding-3-small".to_string()),
                owner_id: Some(OwnerId::from("u1")),
            },
        }
    }

    /// Two separable clusters: "important" near (1, 0), "unimportant" near (0, 1)
    fn separable_records(per_class: usize) -> (Vec<EmbeddingRecord>, Vec<LabeledExample>) {
        let mut records = Vec::new();
        let mut evidence = Vec::new();
        for i in 0..per_class {
            let id = format!("imp-{}", i);
            records.push(record(&id, vec![1.0, 0.05 * i as f32]));
            evidence.push(LabeledExample::new(EmailId::new(id), true));
        }
        for i in 0..per_class {
            let id = format!("unimp-{}", i);
            records.push(record(&id, vec![0.05 * i as f32, 1.0]));
            evidence.push(LabeledExample::new(EmailId::new(id), false));
        }
        (records, evidence)
    }

    fn classifier(dir: &TempDir) -> UserClassifier {
        UserClassifier::new(
            OwnerId::from("u1"),
            &ClassifierConfig::default(),
            PersistenceLayer::new(dir.path()),
        )
    }

    #[tokio::test]
    async fn train_requires_two_evidence_entries() {
        let dir = TempDir::new().unwrap();
        let mut c = classifier(&dir);
        c.add_evidence(vec![LabeledExample::new(EmailId::from("a"), true)])
            .await
            .unwrap();

        let err = c.train(&[record("a", vec![1.0, 0.0])]).await;
        assert!(matches!(err, Err(TriageError::InsufficientData(_))));
        assert!(!c.has_model());
    }

    #[tokio::test]
    async fn train_requires_two_resolved_embeddings() {
        let dir = TempDir::new().unwrap();
        let mut c = classifier(&dir);
        c.add_evidence(vec![
            LabeledExample::new(EmailId::from("a"), true),
            LabeledExample::new(EmailId::from("b"), false),
        ])
        .await
        .unwrap();

        // Only one of the two ids resolves
        let err = c.train(&[record("a", vec![1.0, 0.0])]).await;
        assert!(matches!(err, Err(TriageError::InsufficientData(_))));
    }

    #[tokio::test]
    async fn cleared_model_does_not_come_back_after_hydration() {
        let dir = TempDir::new().unwrap();
        let persistence = PersistenceLayer::new(dir.path());
        let cfg = ClassifierConfig::default();

        let mut c = UserClassifier::new(OwnerId::from("u1"), &cfg, persistence.clone());
        let (records, evidence) = separable_records(3);
        c.add_evidence(evidence).await.unwrap();
        c.train(&records).await.unwrap();
        let trained_version = c.model_version().to_string();

        // Discard everything, then fail the follow-up training
        c.clear_evidence();
        assert_eq!(c.model_version(), NO_MODEL_VERSION);
        c.add_evidence(vec![
            LabeledExample::new(EmailId::from("ghost-a"), true),
            LabeledExample::new(EmailId::from("ghost-b"), false),
        ])
        .await
        .unwrap();
        let err = c.train(&[]).await;
        assert!(matches!(err, Err(TriageError::InsufficientData(_))));

        // Hydration must not resurrect the discarded model
        let restored = UserClassifier::hydrate(OwnerId::from("u1"), &cfg, persistence).await;
        assert!(!restored.has_model());
        assert_ne!(restored.model_version(), trained_version);
    }

    #[tokio::test]
    async fn classify_before_train_is_model_not_trained() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);
        let err = c.classify(&[record("t", vec![1.0, 0.0])], &[]);
        assert!(matches!(err, Err(TriageError::ModelNotTrained(_))));
    }

    #[tokio::test]
    async fn train_with_two_distinct_labels_yields_usable_model() {
        let dir = TempDir::new().unwrap();
        let mut c = classifier(&dir);
        let (records, evidence) = separable_records(1);
        c.add_evidence(evidence).await.unwrap();
        c.train(&records).await.unwrap();
        assert!(c.has_model());

        let outcomes = c
            .classify(&[record("probe", vec![1.0, 0.0])], &records)
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].confidence >= 0.0 && outcomes[0].confidence <= 1.0);
        assert!(!outcomes[0].reasoning.is_empty());
    }

    #[tokio::test]
    async fn training_changes_model_version() {
        let dir = TempDir::new().unwrap();
        let mut c = classifier(&dir);
        let (records, evidence) = separable_records(3);
        c.add_evidence(evidence).await.unwrap();

        let before = c.model_version().to_string();
        c.train(&records).await.unwrap();
        let after = c.model_version().to_string();
        assert_ne!(before, after);

        c.train(&records).await.unwrap();
        assert_ne!(after, c.model_version());
    }

    #[tokio::test]
    async fn persist_then_hydrate_gives_identical_predictions() {
        let dir = TempDir::new().unwrap();
        let persistence = PersistenceLayer::new(dir.path());
        let cfg = ClassifierConfig::default();

        let mut c = UserClassifier::new(OwnerId::from("u1"), &cfg, persistence.clone());
        let (records, evidence) = separable_records(3);
        c.add_evidence(evidence).await.unwrap();
        c.train(&records).await.unwrap();

        let probe = record("probe", vec![0.9, 0.1]);
        let before = c.classify(&[probe.clone()], &records).unwrap();

        let restored = UserClassifier::hydrate(OwnerId::from("u1"), &cfg, persistence).await;
        assert!(restored.has_model());
        assert_eq!(restored.evidence_count(), 6);
        assert_eq!(restored.model_version(), c.model_version());

        let after = restored.classify(&[probe], &records).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn duplicate_evidence_accumulates() {
        let dir = TempDir::new().unwrap();
        let mut c = classifier(&dir);
        let example = LabeledExample::new(EmailId::from("a"), true);
        c.add_evidence(vec![example.clone(), example.clone()])
            .await
            .unwrap();
        c.add_evidence(vec![example]).await.unwrap();
        assert_eq!(c.evidence_count(), 3);
    }
}
