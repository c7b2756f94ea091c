//! Core data types for the mailtriage classification system
//!
//! This module defines the fundamental data structures used throughout
//! mailtriage: owner and email identifiers, labeled evidence, embedding
//! records as read from the vector store, and classification outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an email
///
/// Wraps the opaque id assigned by the ingestion pipeline to provide type
/// safety and prevent mixing email ids with owner ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(pub String);

impl EmailId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EmailId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for the user owning emails and a classifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user- or feedback-supplied (email, label) pair used as training evidence
///
/// Immutable once created. A classifier's evidence set may contain duplicate
/// entries for the same email id; duplicates accumulate and are not
/// deduplicated anywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub email_id: EmailId,
    pub is_important: bool,
    /// Label confidence in [0, 1]; user-supplied labels default to 1.0
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl LabeledExample {
    pub fn new(email_id: EmailId, is_important: bool) -> Self {
        Self {
            email_id,
            is_important,
            confidence: 1.0,
        }
    }
}

/// Metadata attached to an embedding record by the ingestion pipeline
///
/// All fields are optional: the pipeline is external and records observed in
/// the wild are frequently missing one or more of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    /// RFC 3339 timestamp of when the email was created
    pub created_at: Option<String>,
    /// Name of the model that produced the embedding
    pub embedding_model: Option<String>,
    /// Owner recorded alongside the embedding
    pub owner_id: Option<OwnerId>,
}

/// An embedded email as read from the vector store
///
/// Owned and mutated only by the embedding pipeline; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub email_id: EmailId,
    pub owner_id: OwnerId,
    /// May be empty when the store returned the record without its vector
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: EmbeddingMetadata,
}

/// Importance state of an email in the ground-truth store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Unclassified,
    Important,
    NotImportant,
}

impl Importance {
    /// Wire string as stored in the ground-truth record
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Unclassified => "unclassified",
            Importance::Important => "important",
            Importance::NotImportant => "not_important",
        }
    }

    /// Parse the stored wire string; unknown or missing values are treated
    /// as unclassified
    pub fn from_stored(s: Option<&str>) -> Self {
        match s {
            Some("important") => Importance::Important,
            Some("not_important") => Importance::NotImportant,
            _ => Importance::Unclassified,
        }
    }

    pub fn from_label(is_important: bool) -> Self {
        if is_important {
            Importance::Important
        } else {
            Importance::NotImportant
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Importance::Unclassified)
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification outcome for a single email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub email_id: EmailId,
    pub is_important: bool,
    /// Maximum class probability reported by the model, in [0, 1]
    pub confidence: f64,
    /// Descriptive summary of contributing signals; never feeds back into
    /// the prediction
    pub reasoning: String,
}

/// Summary statistics for an owner's classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStats {
    pub owner_id: OwnerId,
    pub total_examples: usize,
    pub last_trained: DateTime<Utc>,
    pub model_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_round_trips_wire_strings() {
        for imp in [
            Importance::Unclassified,
            Importance::Important,
            Importance::NotImportant,
        ] {
            assert_eq!(Importance::from_stored(Some(imp.as_str())), imp);
        }
        assert_eq!(Importance::from_stored(None), Importance::Unclassified);
        assert_eq!(
            Importance::from_stored(Some("garbage")),
            Importance::Unclassified
        );
    }

    #[test]
    fn labeled_example_defaults_to_full_confidence() {
        let parsed: LabeledExample =
            serde_json::from_str(r#"{"email_id":"e1","is_important":true}"#).unwrap();
        assert_eq!(parsed.confidence, 1.0);
        assert_eq!(parsed.email_id, EmailId::from("e1"));
    }
}
