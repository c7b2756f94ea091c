//! Configuration for the mailtriage service
//!
//! Settings are layered from an optional TOML file and environment
//! variables prefixed with `MAILTRIAGE_` (double underscore as the section
//! separator, e.g. `MAILTRIAGE_HTTP__PORT=8080`).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Root directory for persisted per-owner classifier state
    pub data_dir: PathBuf,
    pub http: HttpConfig,
    pub embedding_store: EmbeddingStoreConfig,
    pub ground_truth: GroundTruthConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierConfig,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            http: HttpConfig::default(),
            embedding_store: EmbeddingStoreConfig::default(),
            ground_truth: GroundTruthConfig::default(),
            scheduler: SchedulerConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailtriage")
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Embedding store backend selection and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingStoreConfig {
    /// Backend kind; currently only "qdrant"
    pub backend: String,
    pub url: String,
    pub collection: String,
}

impl Default for EmbeddingStoreConfig {
    fn default() -> Self {
        Self {
            backend: "qdrant".to_string(),
            url: "http://localhost:6333".to_string(),
            collection: "email_embeddings".to_string(),
        }
    }
}

/// Ground-truth (relational) store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthConfig {
    pub db_path: PathBuf,
}

impl Default for GroundTruthConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/emails.db"),
        }
    }
}

/// Incremental sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the sweep as a background task of the server process
    pub enabled: bool,
    /// Seconds between sweep cycles in continuous mode
    pub interval_secs: u64,
    /// Number of emails submitted per classification batch
    pub batch_size: usize,
    /// Fixed delay between batch submissions, bounding outbound rate
    pub batch_delay_ms: u64,
    /// Page size for the embedding store scan
    pub page_size: usize,
    /// Timeout applied to every outbound store or classification call
    pub request_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 10,
            batch_delay_ms: 1000,
            page_size: 500,
            request_timeout_secs: 60,
        }
    }
}

/// Classifier training and feature extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum evidence entries before training or classification
    pub min_evidence: usize,
    /// Evidence count at which labeling and feedback trigger a retrain
    pub retrain_threshold: usize,
    /// Number of trees in the ensemble
    pub trees: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// RNG seed for reproducible training
    pub seed: u64,
    /// Include the target email in its own reference set during training.
    /// Off by default: self-similarity of 1.0 inflates the discriminative
    /// feature for the featurized row.
    pub include_self_in_reference: bool,
    /// Substring expected in the embedding model name for the
    /// model-consistency feature
    pub expected_model_marker: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_evidence: 2,
            retrain_threshold: 10,
            trees: 50,
            max_depth: 10,
            seed: 42,
            include_self_in_reference: false,
            expected_model_marker: "text-embedding".to_string(),
        }
    }
}

impl TriageConfig {
    /// Load configuration from an optional TOML file plus environment
    /// overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("mailtriage").required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("MAILTRIAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // serde defaults fill every field the sources did not set
        Ok(settings.try_deserialize()?)
    }
}
