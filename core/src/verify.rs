//! Milestone verification over an aggregated oracle batch:
//! signature checks, consistency scoring, IQR anomaly detection, and
//! a weighted confidence score.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::event::{EventSink, GovernanceEvent};
use crate::oracle::{aggregate, OracleBatch, OracleDataPoint, OracleFeed};
use crate::store::GovernanceStore;
use crate::Result;

/// Verification policy constants. These determine financial outcomes,
/// so none of them are hard-wired; a deployment loads its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Minimum consistency score (derived from the coefficient of
    /// variation); the batch must score strictly above this.
    pub min_consistency: f64,
    /// Batch fails once the anomaly ratio reaches this bound.
    pub max_anomaly_ratio: f64,
    /// Overall confidence must be strictly above this.
    pub min_confidence: f64,
    /// Confidence contribution when all present signatures are valid.
    pub signature_weight: f64,
    /// Confidence contribution scaled by the consistency score.
    pub consistency_weight: f64,
    /// Confidence budget the anomaly ratio eats into.
    pub anomaly_weight: f64,
    /// Confidence contribution scaled by mean per-point confidence.
    pub confidence_weight: f64,
    /// IQR multiplier for the anomaly bounds.
    pub iqr_multiplier: f64,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            min_consistency: 0.7,
            max_anomaly_ratio: 0.10,
            min_confidence: 0.8,
            signature_weight: 0.3,
            consistency_weight: 0.3,
            anomaly_weight: 0.2,
            confidence_weight: 0.2,
            iqr_multiplier: 1.5,
        }
    }
}

/// Why a batch failed verification. Surfaced individually so a human
/// reviewer can triage, not just a boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerificationFailure {
    /// Every feed was excluded or silent.
    NoData,
    /// A point from this feed carried an invalid signature.
    InvalidSignature { feed_id: String },
    InconsistentData { score: f64, minimum: f64 },
    AnomalyRatioExceeded { ratio: f64, maximum: f64 },
    LowConfidence { score: f64, minimum: f64 },
}

/// Pure function output of verifying one aggregated batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub milestone_id: String,
    pub verified: bool,
    pub confidence: f64,
    pub consistency: f64,
    pub anomaly_count: usize,
    /// Feeds that contributed points.
    pub sources: Vec<String>,
    pub computed_at: i64,
    pub failures: Vec<VerificationFailure>,
}

/// Aggregate a milestone's feeds and verify the batch, publishing the
/// outcome as an event.
pub fn verify_milestone<S>(
    store: &S,
    events: &dyn EventSink,
    project_id: &str,
    milestone_id: &str,
    policy: &VerificationPolicy,
    points_per_feed: usize,
    now: i64,
) -> Result<VerificationResult>
where
    S: GovernanceStore + ?Sized,
{
    let batch = aggregate(store, project_id, milestone_id, points_per_feed, now)?;
    let result = verify_batch(&batch, policy, now);
    events.publish(GovernanceEvent::MilestoneVerified {
        project_id: project_id.to_string(),
        milestone_id: milestone_id.to_string(),
        verified: result.verified,
        confidence: result.confidence,
    });
    Ok(result)
}

/// Verify an aggregated batch against the policy. A milestone is
/// verified iff every requirement holds; an empty batch is always
/// rejected with confidence 0.
pub fn verify_batch(
    batch: &OracleBatch,
    policy: &VerificationPolicy,
    now: i64,
) -> VerificationResult {
    if batch.is_empty() {
        return VerificationResult {
            milestone_id: batch.milestone_id.clone(),
            verified: false,
            confidence: 0.0,
            consistency: 0.0,
            anomaly_count: 0,
            sources: Vec::new(),
            computed_at: now,
            failures: vec![VerificationFailure::NoData],
        };
    }

    let mut failures = Vec::new();

    // 1. all present signatures must be valid
    let mut bad_feeds: Vec<String> = Vec::new();
    for point in &batch.points {
        let feed = batch.feeds.iter().find(|f| f.id == point.feed_id);
        if !signature_valid(point, feed) && !bad_feeds.contains(&point.feed_id) {
            bad_feeds.push(point.feed_id.clone());
        }
    }
    let signatures_ok = bad_feeds.is_empty();
    for feed_id in bad_feeds {
        failures.push(VerificationFailure::InvalidSignature { feed_id });
    }

    // 2. consistency from the coefficient of variation
    let values: Vec<f64> = batch.points.iter().map(|p| p.value).collect();
    let consistency = consistency_score(&values);
    if consistency <= policy.min_consistency {
        failures.push(VerificationFailure::InconsistentData {
            score: consistency,
            minimum: policy.min_consistency,
        });
    }

    // 3. IQR anomaly bounds
    let anomaly_count = count_anomalies(&values, policy.iqr_multiplier);
    let anomaly_ratio = anomaly_count as f64 / values.len() as f64;
    if anomaly_ratio >= policy.max_anomaly_ratio {
        failures.push(VerificationFailure::AnomalyRatioExceeded {
            ratio: anomaly_ratio,
            maximum: policy.max_anomaly_ratio,
        });
    }

    // 4. weighted confidence
    let avg_point_confidence = mean(
        &batch
            .points
            .iter()
            .map(|p| p.confidence.clamp(0.0, 1.0))
            .collect::<Vec<_>>(),
    );
    let anomaly_component = if policy.max_anomaly_ratio > 0.0 {
        (policy.anomaly_weight * (1.0 - anomaly_ratio / policy.max_anomaly_ratio)).max(0.0)
    } else if anomaly_count == 0 {
        policy.anomaly_weight
    } else {
        0.0
    };
    let signature_component = if signatures_ok { policy.signature_weight } else { 0.0 };
    let confidence = signature_component
        + policy.consistency_weight * consistency
        + anomaly_component
        + policy.confidence_weight * avg_point_confidence;
    if confidence <= policy.min_confidence {
        failures.push(VerificationFailure::LowConfidence {
            score: confidence,
            minimum: policy.min_confidence,
        });
    }

    VerificationResult {
        milestone_id: batch.milestone_id.clone(),
        verified: failures.is_empty(),
        confidence,
        consistency,
        anomaly_count,
        sources: batch.sources(),
        computed_at: now,
        failures,
    }
}

/// With a registered feed key the signature is cryptographically
/// verified over the point's canonical message; without one, a
/// well-formed 64-byte hex signature passes (the format stand-in).
/// Unsigned points are fine either way.
fn signature_valid(point: &OracleDataPoint, feed: Option<&OracleFeed>) -> bool {
    let Some(sig_hex) = &point.signature else {
        return true;
    };
    let Ok(bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    match feed.and_then(|f| f.public_key.as_ref()) {
        Some(key_bytes) => {
            let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
                return false;
            };
            key.verify(&point.canonical_message(), &signature).is_ok()
        }
        None => true,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// `max(0, min(1, 1 - CV))` where CV is stddev over |mean|. An
/// all-identical batch (including all-zero) is perfectly consistent.
fn consistency_score(values: &[f64]) -> f64 {
    let m = mean(values);
    let sd = std_dev(values);
    if m == 0.0 {
        return if sd == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - sd / m.abs()).clamp(0.0, 1.0)
}

/// Values outside `[Q1 - k*IQR, Q3 + k*IQR]` are anomalies.
fn count_anomalies(values: &[f64], iqr_multiplier: f64) -> usize {
    if values.len() < 2 {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let q1 = sorted[(0.25 * n as f64).floor() as usize];
    let q3 = sorted[(0.75 * n as f64).floor() as usize];
    let iqr = q3 - q1;
    let lower = q1 - iqr_multiplier * iqr;
    let upper = q3 + iqr_multiplier * iqr;
    values.iter().filter(|v| **v < lower || **v > upper).count()
}
