//! Per-user importance classification
//!
//! Feature extraction, the bagged-tree ensemble, the per-owner classifier,
//! and the process-wide registry.

pub mod features;
pub mod model;
pub mod registry;
pub mod user;

pub use features::{FeatureExtractor, DISCRIMINATIVE_FEATURE, FEATURE_DIM};
pub use model::{ImportanceModel, ModelParams};
pub use registry::{ClassifierHandle, ClassifierRegistry};
pub use user::{UserClassifier, NO_MODEL_VERSION};
