//! Shared fixtures for integration tests

use mailtriage::classifier::ClassifierRegistry;
use mailtriage::config::ClassifierConfig;
use mailtriage::persist::PersistenceLayer;
use mailtriage::service::ClassificationService;
use mailtriage::storage::memory::MemoryEmbeddingStore;
use mailtriage::types::{EmailId, EmbeddingMetadata, EmbeddingRecord, OwnerId};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub service: Arc<ClassificationService>,
    pub embeddings: Arc<MemoryEmbeddingStore>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let (service, embeddings) = service_at(dir.path());
        Self {
            dir,
            service,
            embeddings,
        }
    }

    /// A second service over the same data directory, as after a process
    /// restart. Shares the embedding store but nothing in memory.
    pub fn restarted(&self) -> Arc<ClassificationService> {
        let registry = Arc::new(ClassifierRegistry::new(
            PersistenceLayer::new(self.dir.path()),
            ClassifierConfig::default(),
        ));
        Arc::new(ClassificationService::new(
            registry,
            self.embeddings.clone(),
            ClassifierConfig::default(),
        ))
    }

    /// Seed embeddings clustered along two axes: "urgent" mail near (1, 0),
    /// "newsletter" mail near (0, 1)
    pub fn seed_separable(&self, owner: &str, per_class: usize) -> (Vec<EmailId>, Vec<EmailId>) {
        let mut urgent = Vec::new();
        let mut newsletter = Vec::new();
        for i in 0..per_class {
            let jitter = 0.04 * i as f32;
            let u = format!("{owner}-urgent-{i}");
            let n = format!("{owner}-news-{i}");
            self.embeddings
                .insert(record(&u, owner, vec![1.0, jitter]));
            self.embeddings
                .insert(record(&n, owner, vec![jitter, 1.0]));
            urgent.push(EmailId::new(u));
            newsletter.push(EmailId::new(n));
        }
        (urgent, newsletter)
    }
}

pub fn service_at(
    data_dir: &std::path::Path,
) -> (Arc<ClassificationService>, Arc<MemoryEmbeddingStore>) {
    let registry = Arc::new(ClassifierRegistry::new(
        PersistenceLayer::new(data_dir),
        ClassifierConfig::default(),
    ));
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let service = Arc::new(ClassificationService::new(
        registry,
        embeddings.clone(),
        ClassifierConfig::default(),
    ));
    (service, embeddings)
}

pub fn record(id: &str, owner: &str, embedding: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        email_id: EmailId::from(id),
        owner_id: OwnerId::from(owner),
        embedding,
        metadata: EmbeddingMetadata {
            created_at: Some("2024-05-12T09:30:00Z".to_string()),
            embedding_model: Some("text-embedding-3-small".to_string()),
            owner_id: Some(OwnerId::from(owner)),
        },
    }
}
