//! Mailtriage - Per-User Email Importance Classification
//!
//! An incrementally-trainable importance classifier over pre-computed email
//! embeddings:
//! - Per-owner bagged decision-tree models learned from labeled examples
//! - Similarity features against the owner's own labeled mail
//! - Classifier state persisted across restarts
//! - A background sweep that labels newly-embedded mail automatically
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (EmbeddingRecord, LabeledExample, etc.)
//! - **Storage**: Embedding store (Qdrant) and ground-truth store (SQLite)
//! - **Classifier**: Feature extraction, ensemble model, per-owner registry
//! - **Service**: The operation surface the API and the sweep both drive
//!
//! # Example
//!
//! ```ignore
//! use mailtriage::{ClassificationService, ClassifierRegistry, PersistenceLayer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TriageConfig::load(Some("config.toml"))?;
//!     let embeddings = storage::build_embedding_store(&config.embedding_store)?;
//!     let registry = Arc::new(ClassifierRegistry::new(
//!         PersistenceLayer::new(&config.classifier.data_dir),
//!         config.classifier.clone(),
//!     ));
//!     let service = ClassificationService::new(registry, embeddings, config.classifier);
//!
//!     let response = service.classify(ClassifyRequest {
//!         owner_id: "user-1".into(),
//!         email_ids: vec!["email-42".into()],
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Note for operators: the background sweep is at-most-once. A batch that
//! fails mid-sweep is marked processed without retry and will only be
//! revisited after a process restart.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod persist;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use classifier::{ClassifierRegistry, UserClassifier};
pub use config::TriageConfig;
pub use error::{Result, TriageError};
pub use persist::PersistenceLayer;
pub use scheduler::IncrementalScheduler;
pub use service::ClassificationService;
pub use storage::{EmbeddingStore, GroundTruthStore};
pub use types::{
    ClassificationOutcome, EmailId, EmbeddingRecord, Importance, LabeledExample, ModelStats,
    OwnerId,
};
