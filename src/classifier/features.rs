//! Feature extraction for importance classification
//!
//! Turns one target embedding plus a labeled reference set into a
//! fixed-length numeric vector. Extraction is deterministic and pure: no
//! I/O, no mutation, and degenerate inputs produce a defined zero vector
//! rather than an error.

use crate::types::{EmbeddingRecord, OwnerId};
use chrono::{DateTime, Datelike, Timelike};

/// Width of the feature vector
///
/// Slot 14 is unused and always 0.0; it keeps populated vectors the same
/// width as the degenerate zero vector.
pub const FEATURE_DIM: usize = 15;

/// Index of the discriminative difference feature
/// (mean important similarity minus mean unimportant similarity)
pub const DISCRIMINATIVE_FEATURE: usize = 4;

/// Stateless extractor configured for one owner
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    owner: OwnerId,
    /// Substring expected in the embedding model name
    expected_model_marker: String,
    /// Whether the target may appear in its own reference set. When false
    /// (the default) the target is filtered out before featurization, so a
    /// training row never sees its own 1.0 self-similarity.
    include_self: bool,
}

impl FeatureExtractor {
    pub fn new(owner: OwnerId, expected_model_marker: String, include_self: bool) -> Self {
        Self {
            owner,
            expected_model_marker,
            include_self,
        }
    }

    /// Extract the feature vector for one target against a labeled
    /// reference set (`true` = important)
    pub fn extract(
        &self,
        target: &EmbeddingRecord,
        reference: &[(&EmbeddingRecord, bool)],
    ) -> [f64; FEATURE_DIM] {
        let mut features = [0.0; FEATURE_DIM];

        if target.embedding.is_empty() {
            return features;
        }

        let mut important_sims = Vec::new();
        let mut unimportant_sims = Vec::new();

        for (record, is_important) in reference {
            if record.embedding.is_empty() {
                continue;
            }
            if !self.include_self && record.email_id == target.email_id {
                continue;
            }
            let sim = cosine_similarity(&target.embedding, &record.embedding);
            if *is_important {
                important_sims.push(sim);
            } else {
                unimportant_sims.push(sim);
            }
        }

        if important_sims.is_empty() && unimportant_sims.is_empty() {
            return features;
        }

        let avg_important = mean(&important_sims);
        let avg_unimportant = mean(&unimportant_sims);

        features[0] = avg_important;
        features[1] = max(&important_sims);
        features[2] = avg_unimportant;
        features[3] = max(&unimportant_sims);
        features[DISCRIMINATIVE_FEATURE] = avg_important - avg_unimportant;

        let all: Vec<f64> = important_sims
            .iter()
            .chain(unimportant_sims.iter())
            .copied()
            .collect();
        features[5] = mean(&all);
        features[6] = std_dev(&all);
        features[7] = max(&all);

        features[8] = l2_norm(&target.embedding);

        let (business, weekend, off_hours) =
            temporal_indicators(target.metadata.created_at.as_deref());
        features[9] = business;
        features[10] = weekend;
        features[11] = off_hours;

        features[12] = if target.metadata.owner_id.as_ref() == Some(&self.owner) {
            1.0
        } else {
            0.0
        };
        features[13] = if self.model_matches(target) { 1.0 } else { 0.0 };

        features
    }

    /// Human-readable summary of the qualitative signals behind a
    /// prediction. Descriptive only; never feeds back into the model.
    pub fn reasoning(
        &self,
        target: &EmbeddingRecord,
        is_important: bool,
        confidence: f64,
    ) -> String {
        let mut reasons = Vec::new();

        if self.model_matches(target) {
            reasons.push("consistent embedding model".to_string());
        }
        if target.metadata.owner_id.as_ref() == Some(&self.owner) {
            reasons.push("same owner context".to_string());
        }

        if let Some(created_at) = target.metadata.created_at.as_deref() {
            if let Ok(dt) = DateTime::parse_from_rfc3339(created_at) {
                let hour = dt.hour();
                if (9..=17).contains(&hour) {
                    reasons.push("sent during business hours".to_string());
                }
                if dt.weekday().num_days_from_monday() < 5 {
                    reasons.push("sent on weekday".to_string());
                }
            }
        }

        if !target.embedding.is_empty() {
            reasons.push("semantic content analysis".to_string());
        }

        let label = if is_important {
            "important"
        } else {
            "not important"
        };
        let detail = if reasons.is_empty() {
            "based on learned patterns".to_string()
        } else {
            reasons.join(", ")
        };

        format!(
            "Classified as {} (confidence: {:.2}) - {}",
            label, confidence, detail
        )
    }

    fn model_matches(&self, target: &EmbeddingRecord) -> bool {
        target
            .metadata
            .embedding_model
            .as_deref()
            .map(|m| m.contains(&self.expected_model_marker))
            .unwrap_or(false)
    }
}

/// Business-hours, weekend, and off-hours indicators for an RFC 3339
/// timestamp; neutral (0.5, 0.5, 0.0) when missing or unparseable
fn temporal_indicators(created_at: Option<&str>) -> (f64, f64, f64) {
    let Some(raw) = created_at else {
        return (0.5, 0.5, 0.0);
    };
    let Ok(dt) = DateTime::parse_from_rfc3339(raw) else {
        return (0.5, 0.5, 0.0);
    };

    let hour = dt.hour();
    let business = if (9..=17).contains(&hour) { 1.0 } else { 0.0 };
    let weekend = if dt.weekday().num_days_from_monday() >= 5 {
        1.0
    } else {
        0.0
    };
    let off_hours = if hour < 8 || hour > 18 { 1.0 } else { 0.0 };
    (business, weekend, off_hours)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for i in 0..len {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmailId, EmbeddingMetadata, EmbeddingRecord};

    fn record(id: &str, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            email_id: EmailId::from(id),
            owner_id: OwnerId::from("u1"),
            embedding,
            metadata: EmbeddingMetadata {
                created_at: None,
                embedding_model: None,
                owner_id: Some(OwnerId::from("u1")),
            },
        }
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(OwnerId::from("u1"), "text-embedding".to_string(), false)
    }

    #[test]
    fn target_without_embedding_yields_zero_vector() {
        let target = record("t", vec![]);
        let reference = record("r", vec![1.0, 0.0]);
        let features = extractor().extract(&target, &[(&reference, true)]);
        assert_eq!(features, [0.0; FEATURE_DIM]);
    }

    #[test]
    fn empty_reference_set_yields_zero_vector() {
        let target = record("t", vec![1.0, 0.0]);
        let features = extractor().extract(&target, &[]);
        assert_eq!(features, [0.0; FEATURE_DIM]);
    }

    #[test]
    fn swapping_partitions_flips_discriminative_sign() {
        let target = record("t", vec![1.0, 0.0, 0.5]);
        let a = record("a", vec![0.9, 0.1, 0.4]);
        let b = record("b", vec![0.0, 1.0, 0.2]);

        let fx = extractor();
        let forward = fx.extract(&target, &[(&a, true), (&b, false)]);
        let swapped = fx.extract(&target, &[(&a, false), (&b, true)]);

        let diff = forward[DISCRIMINATIVE_FEATURE];
        assert!(diff.abs() > 1e-9);
        assert!((swapped[DISCRIMINATIVE_FEATURE] + diff).abs() < 1e-12);
    }

    #[test]
    fn self_reference_is_excluded_by_default() {
        let target = record("t", vec![1.0, 0.0]);
        let other = record("o", vec![0.0, 1.0]);

        let fx = extractor();
        let features = fx.extract(&target, &[(&target, true), (&other, false)]);
        // With self excluded the important partition is empty
        assert_eq!(features[0], 0.0);
        assert_eq!(features[1], 0.0);

        let fx_inclusive =
            FeatureExtractor::new(OwnerId::from("u1"), "text-embedding".to_string(), true);
        let features = fx_inclusive.extract(&target, &[(&target, true), (&other, false)]);
        // Self-similarity is exactly 1.0 and inflates the partition
        assert!((features[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn temporal_indicators_handle_missing_and_bad_timestamps() {
        assert_eq!(temporal_indicators(None), (0.5, 0.5, 0.0));
        assert_eq!(temporal_indicators(Some("not a date")), (0.5, 0.5, 0.0));

        // Monday 10:00 UTC: business hours, weekday, not off-hours
        let (business, weekend, off) = temporal_indicators(Some("2024-03-04T10:00:00Z"));
        assert_eq!((business, weekend, off), (1.0, 0.0, 0.0));

        // Saturday 22:00 UTC: off-hours weekend
        let (business, weekend, off) = temporal_indicators(Some("2024-03-09T22:00:00Z"));
        assert_eq!((business, weekend, off), (0.0, 1.0, 1.0));
    }

    #[test]
    fn metadata_consistency_features_are_set() {
        let mut target = record("t", vec![1.0, 0.0]);
        target.metadata.embedding_model = Some("text-embedding-3-small".to_string());
        let reference = record("r", vec![0.5, 0.5]);

        let features = extractor().extract(&target, &[(&reference, true)]);
        assert_eq!(features[12], 1.0);
        assert_eq!(features[13], 1.0);
        // Reserved slot stays zero
        assert_eq!(features[14], 0.0);
    }

    #[test]
    fn reasoning_mentions_contributing_signals() {
        let mut target = record("t", vec![1.0, 0.0]);
        target.metadata.embedding_model = Some("text-embedding-ada".to_string());
        target.metadata.created_at = Some("2024-03-04T10:00:00Z".to_string());

        let text = extractor().reasoning(&target, true, 0.87);
        assert!(text.contains("important"));
        assert!(text.contains("0.87"));
        assert!(text.contains("consistent embedding model"));
        assert!(text.contains("business hours"));
        assert!(text.contains("semantic content analysis"));
    }
}
