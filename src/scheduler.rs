//! Incremental classification sweep
//!
//! Background loop that discovers embedded emails with no importance label,
//! checks per-owner readiness, batches the ready owners' emails through the
//! classification service, and reconciles results into the ground-truth
//! store. Runs either continuously on a fixed interval or exactly once.
//!
//! Delivery policy is at-most-once: a batch that fails to classify (or
//! times out) is logged and marked processed, never retried, so an
//! unreachable service cannot build up a retry storm. Operators should know
//! this means intermittent failures leave permanently-unclassified items
//! until a process restart rescans them. The in-process processed set is
//! only a same-run cache; across restarts the ground-truth store's own
//! importance field is the authoritative filter.

use crate::config::SchedulerConfig;
use crate::error::{Result, TriageError};
use crate::service::{ClassificationService, ClassifyRequest};
use crate::storage::{EmbeddingStore, GroundTruthStore};
use crate::types::{EmailId, Importance, OwnerId};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Counters for one sweep cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// Unclassified ids discovered this cycle
    pub discovered: usize,
    /// Ids skipped because their owner was not ready
    pub skipped_unready: usize,
    /// Ids submitted for classification
    pub submitted: usize,
    /// Results written to the ground-truth store
    pub reconciled: usize,
    /// Batches that failed and were dropped
    pub failed_batches: usize,
}

/// The background sweep driver
pub struct IncrementalScheduler {
    service: Arc<ClassificationService>,
    embeddings: Arc<dyn EmbeddingStore>,
    ground_truth: Arc<dyn GroundTruthStore>,
    cfg: SchedulerConfig,
    /// Same-run de-duplication cache; monotonic within a process lifetime
    processed: HashSet<EmailId>,
}

impl IncrementalScheduler {
    pub fn new(
        service: Arc<ClassificationService>,
        embeddings: Arc<dyn EmbeddingStore>,
        ground_truth: Arc<dyn GroundTruthStore>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            embeddings,
            ground_truth,
            cfg,
            processed: HashSet::new(),
        }
    }

    /// Run sweep cycles until the shutdown signal flips
    ///
    /// Interruption happens between cycles, never mid-batch; cleanup always
    /// runs on the way out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Incremental sweep started (interval {}s, batch size {})",
            self.cfg.interval_secs, self.cfg.batch_size
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(summary) => debug!("Sweep cycle complete: {:?}", summary),
                Err(e) => warn!("Sweep cycle deferred: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.cfg.interval_secs)) => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown, otherwise the
                    // closed channel would resolve instantly every cycle
                    // and spin without the interval delay
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Incremental sweep stopped, cleanup complete");
    }

    /// Run exactly one cycle: scan, readiness-check, batch, submit,
    /// reconcile
    pub async fn run_once(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        let by_owner = self.discover().await?;
        summary.discovered = by_owner.values().map(Vec::len).sum();
        if by_owner.is_empty() {
            debug!("No unclassified emails found");
            return Ok(summary);
        }

        info!(
            "Found {} unclassified emails across {} owners",
            summary.discovered,
            by_owner.len()
        );

        for (owner, ids) in by_owner {
            self.process_owner(&owner, ids, &mut summary).await;
        }

        Ok(summary)
    }

    /// Paginated scan of the embedding store, keeping ids that are neither
    /// in the same-run processed cache nor already classified in the
    /// ground-truth store
    ///
    /// The ground-truth check is decisive: nothing downstream re-checks
    /// provenance, so this filter is what keeps human labels intact.
    async fn discover(&mut self) -> Result<BTreeMap<OwnerId, Vec<EmailId>>> {
        let mut by_owner: BTreeMap<OwnerId, Vec<EmailId>> = BTreeMap::new();
        let mut cursor = None;

        loop {
            let page = self
                .with_timeout(self.embeddings.scan_all(cursor, self.cfg.page_size))
                .await?;

            let candidates: Vec<(EmailId, OwnerId)> = page
                .records
                .iter()
                .filter(|r| !self.processed.contains(&r.email_id))
                .map(|r| (r.email_id.clone(), r.owner_id.clone()))
                .collect();

            if !candidates.is_empty() {
                let ids: Vec<EmailId> = candidates.iter().map(|(id, _)| id.clone()).collect();
                let known = self
                    .with_timeout(self.ground_truth.importance_of(&ids))
                    .await?;

                for (id, owner) in candidates {
                    if known
                        .get(&id)
                        .map(Importance::is_classified)
                        .unwrap_or(false)
                    {
                        // Already labeled; cache so later pages and cycles
                        // skip the ground-truth lookup
                        self.processed.insert(id);
                        continue;
                    }
                    by_owner.entry(owner).or_default().push(id);
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(by_owner)
    }

    /// Classify and reconcile one owner's discovered ids
    async fn process_owner(
        &mut self,
        owner: &OwnerId,
        ids: Vec<EmailId>,
        summary: &mut CycleSummary,
    ) {
        if !self.service.is_ready(owner).await {
            let human_labels = self
                .ground_truth
                .human_labeled_count(owner)
                .await
                .unwrap_or(0);
            debug!(
                "Owner {} not ready ({} human labels in ground truth), marking {} emails processed",
                owner,
                human_labels,
                ids.len()
            );
            summary.skipped_unready += ids.len();
            self.processed.extend(ids);
            return;
        }

        info!("Classifying {} emails for {}", ids.len(), owner);

        let mut first = true;
        for batch in ids.chunks(self.cfg.batch_size.max(1)) {
            if !first {
                tokio::time::sleep(Duration::from_millis(self.cfg.batch_delay_ms)).await;
            }
            first = false;

            summary.submitted += batch.len();
            let request = ClassifyRequest {
                owner_id: owner.clone(),
                email_ids: batch.to_vec(),
            };

            match self.with_timeout(self.service.classify(request)).await {
                Ok(response) => {
                    summary.reconciled += self.reconcile(&response.results).await;
                }
                Err(e) => {
                    // At-most-once: the batch is dropped, not retried
                    warn!("Classification batch failed for {}: {}", owner, e);
                    summary.failed_batches += 1;
                }
            }

            self.processed.extend(batch.iter().cloned());
        }
    }

    /// Write classification results back to the ground-truth store;
    /// returns the number of records actually written
    async fn reconcile(&self, results: &[crate::types::ClassificationOutcome]) -> usize {
        let mut written = 0;
        for result in results {
            // Default entries (untrained fallback, unresolved embedding)
            // carry zero confidence; a real model outcome is always >= 0.5.
            // Leave the record unclassified for a later cycle after the
            // owner trains.
            if result.confidence == 0.0 {
                continue;
            }

            let importance = Importance::from_label(result.is_important);
            match self
                .with_timeout(self.ground_truth.record_classification(
                    &result.email_id,
                    importance,
                    result.confidence,
                ))
                .await
            {
                Ok(true) => {
                    info!(
                        "Labeled {}: {} ({:.3})",
                        result.email_id, importance, result.confidence
                    );
                    written += 1;
                }
                Ok(false) => {
                    debug!("Left {} untouched, already classified", result.email_id);
                }
                Err(e) => {
                    warn!("Failed writing result for {}: {}", result.email_id, e);
                }
            }
        }
        written
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(
            Duration::from_secs(self.cfg.request_timeout_secs),
            fut,
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TriageError::StoreUnavailable(format!(
                "operation timed out after {}s",
                self.cfg.request_timeout_secs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierRegistry;
    use crate::config::ClassifierConfig;
    use crate::persist::PersistenceLayer;
    use crate::service::BulkLabelRequest;
    use crate::storage::memory::{GroundTruthRow, MemoryEmbeddingStore, MemoryGroundTruth};
    use crate::types::{EmbeddingMetadata, EmbeddingRecord, LabeledExample};
    use tempfile::TempDir;

    fn record(id: &str, owner: &str, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            email_id: EmailId::from(id),
            owner_id: OwnerId::from(owner),
            embedding,
            metadata: EmbeddingMetadata {
                created_at: Some("2024-03-04T10:00:00Z".to_string()),
                embedding_model: Some("text-embedding-3-small".to_string()),
                owner_id: Some(OwnerId::from(owner)),
            },
        }
    }

    struct Fixture {
        _dir: TempDir,
        service: Arc<ClassificationService>,
        embeddings: Arc<MemoryEmbeddingStore>,
        ground_truth: Arc<MemoryGroundTruth>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let registry = Arc::new(ClassifierRegistry::new(
                PersistenceLayer::new(dir.path()),
                ClassifierConfig::default(),
            ));
            let embeddings = Arc::new(MemoryEmbeddingStore::default());
            let service = Arc::new(ClassificationService::new(
                registry,
                embeddings.clone(),
                ClassifierConfig::default(),
            ));
            Self {
                _dir: dir,
                service,
                embeddings,
                ground_truth: Arc::new(MemoryGroundTruth::new()),
            }
        }

        fn scheduler(&self) -> IncrementalScheduler {
            IncrementalScheduler::new(
                self.service.clone(),
                self.embeddings.clone(),
                self.ground_truth.clone(),
                SchedulerConfig {
                    batch_delay_ms: 0,
                    ..SchedulerConfig::default()
                },
            )
        }

        /// Label 5 important + 5 unimportant separable embeddings for the
        /// owner; hits the retrain threshold so a model gets trained
        async fn train_owner(&self, owner: &str) {
            let mut important = Vec::new();
            let mut unimportant = Vec::new();
            for i in 0..5 {
                let imp_id = format!("{}-imp-{}", owner, i);
                let unimp_id = format!("{}-unimp-{}", owner, i);
                self.embeddings
                    .insert(record(&imp_id, owner, vec![1.0, 0.05 * i as f32]));
                self.embeddings
                    .insert(record(&unimp_id, owner, vec![0.05 * i as f32, 1.0]));
                self.ground_truth.insert(
                    EmailId::new(imp_id.clone()),
                    GroundTruthRow {
                        owner_id: OwnerId::from(owner),
                        importance: Importance::Important,
                        confidence: Some(1.0),
                        is_human_labeled: true,
                    },
                );
                self.ground_truth.insert(
                    EmailId::new(unimp_id.clone()),
                    GroundTruthRow {
                        owner_id: OwnerId::from(owner),
                        importance: Importance::NotImportant,
                        confidence: Some(1.0),
                        is_human_labeled: true,
                    },
                );
                important.push(EmailId::new(imp_id));
                unimportant.push(EmailId::new(unimp_id));
            }

            let outcome = self
                .service
                .bulk_label(BulkLabelRequest {
                    owner_id: OwnerId::from(owner),
                    important_email_ids: important,
                    unimportant_email_ids: unimportant,
                })
                .await
                .unwrap();
            assert!(outcome.retrained);
        }
    }

    #[tokio::test]
    async fn ready_owner_gets_unclassified_mail_reconciled() {
        let fx = Fixture::new();
        fx.train_owner("u1").await;

        fx.embeddings.insert(record("new-1", "u1", vec![0.95, 0.1]));
        fx.embeddings.insert(record("new-2", "u1", vec![0.1, 0.95]));
        fx.ground_truth
            .insert_unclassified(EmailId::from("new-1"), OwnerId::from("u1"));
        fx.ground_truth
            .insert_unclassified(EmailId::from("new-2"), OwnerId::from("u1"));

        let mut scheduler = fx.scheduler();
        let summary = scheduler.run_once().await.unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.reconciled, 2);

        for id in ["new-1", "new-2"] {
            let row = fx.ground_truth.row(&EmailId::from(id)).unwrap();
            assert!(row.importance.is_classified());
            assert!(!row.is_human_labeled);
            assert!(row.confidence.unwrap() >= 0.5);
        }
    }

    #[tokio::test]
    async fn existing_labels_are_never_overwritten() {
        let fx = Fixture::new();
        fx.train_owner("u1").await;

        // Human already labeled this one important; sweep must not touch it
        fx.embeddings
            .insert(record("human", "u1", vec![0.1, 0.95]));
        fx.ground_truth.insert(
            EmailId::from("human"),
            GroundTruthRow {
                owner_id: OwnerId::from("u1"),
                importance: Importance::Important,
                confidence: Some(1.0),
                is_human_labeled: true,
            },
        );

        let mut scheduler = fx.scheduler();
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.discovered, 0);

        let row = fx.ground_truth.row(&EmailId::from("human")).unwrap();
        assert_eq!(row.importance, Importance::Important);
        assert!(row.is_human_labeled);
    }

    #[tokio::test]
    async fn unready_owner_is_marked_processed_but_never_submitted() {
        let fx = Fixture::new();

        // One evidence entry only: below the readiness threshold
        let registry = fx.service.registry();
        let handle = registry.get_or_create(&OwnerId::from("u2")).await;
        handle
            .write()
            .await
            .add_evidence(vec![LabeledExample::new(EmailId::from("seed"), true)])
            .await
            .unwrap();

        fx.embeddings.insert(record("m-1", "u2", vec![1.0, 0.0]));
        fx.ground_truth
            .insert_unclassified(EmailId::from("m-1"), OwnerId::from("u2"));

        let mut scheduler = fx.scheduler();
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.skipped_unready, 1);
        assert_eq!(summary.submitted, 0);

        let row = fx.ground_truth.row(&EmailId::from("m-1")).unwrap();
        assert_eq!(row.importance, Importance::Unclassified);

        // Marked processed: the next cycle does not rediscover it
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.discovered, 0);
    }

    #[tokio::test]
    async fn processed_ids_are_not_revisited_within_a_run() {
        let fx = Fixture::new();
        fx.train_owner("u1").await;

        fx.embeddings.insert(record("new-1", "u1", vec![0.9, 0.1]));
        fx.ground_truth
            .insert_unclassified(EmailId::from("new-1"), OwnerId::from("u1"));

        let mut scheduler = fx.scheduler();
        let first = scheduler.run_once().await.unwrap();
        assert_eq!(first.reconciled, 1);

        let second = scheduler.run_once().await.unwrap();
        assert_eq!(second, CycleSummary::default());
    }

    #[tokio::test]
    async fn run_stops_when_shutdown_sender_is_dropped() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { scheduler.run(rx).await });

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweep did not stop after sender drop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { scheduler.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweep did not stop on shutdown")
            .unwrap();
    }
}
