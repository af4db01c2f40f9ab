//! Weighted score fusion and risk classification
//!
//! # Default weights
//!
//! | Signal | Weight |
//! |--------|--------|
//! | cosine(MFCC) | 0.35 |
//! | cosine(Chroma) | 0.25 |
//! | cosine(Spectral shape) | 0.15 |
//! | normalised DTW(MFCC) | 0.15 |
//! | normalised DTW(Chroma) | 0.10 |
//!
//! Score = weighted sum x 100. Cosine inputs can be negative, so the raw
//! score spans [-75, 100]; [`ScorePolicy`] decides whether that is clamped
//! to [0, 100] before it is reported.
//!
//! # Risk tiers
//!
//! | Score | Risk |
//! |-------|------|
//! | < 40 | Low |
//! | 40 - 74.99 | Medium |
//! | >= 75 | High |

use super::features::FeatureFamily;
use super::metrics::{MetricKind, MetricResult};
use crate::error::{Result, SimilarityError};
use serde::{Deserialize, Serialize};
use std::fmt;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Per-signal weights. Must each lie in [0, 1] and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub cosine_mfcc: f64,
    pub cosine_chroma: f64,
    pub cosine_spectral: f64,
    pub dtw_mfcc: f64,
    pub dtw_chroma: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            cosine_mfcc: 0.35,
            cosine_chroma: 0.25,
            cosine_spectral: 0.15,
            dtw_mfcc: 0.15,
            dtw_chroma: 0.10,
        }
    }
}

impl FusionWeights {
    /// Everything on chroma cosine: the single-feature chroma scorer.
    pub fn chroma_only() -> Self {
        Self {
            cosine_mfcc: 0.0,
            cosine_chroma: 1.0,
            cosine_spectral: 0.0,
            dtw_mfcc: 0.0,
            dtw_chroma: 0.0,
        }
    }

    fn as_array(&self) -> [f64; 5] {
        [
            self.cosine_mfcc,
            self.cosine_chroma,
            self.cosine_spectral,
            self.dtw_mfcc,
            self.dtw_chroma,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if let Some(w) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
            return Err(SimilarityError::InvalidConfig(format!(
                "fusion weight {} is outside [0, 1]",
                w
            )));
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SimilarityError::InvalidConfig(format!(
                "fusion weights sum to {}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }

    /// Weight of a (family, metric) signal, `None` for pairs that are not
    /// fused (DTW on spectral shape).
    pub fn weight_for(&self, family: FeatureFamily, kind: MetricKind) -> Option<f64> {
        match (family, kind) {
            (FeatureFamily::Mfcc, MetricKind::Cosine) => Some(self.cosine_mfcc),
            (FeatureFamily::Chroma, MetricKind::Cosine) => Some(self.cosine_chroma),
            (FeatureFamily::SpectralShape, MetricKind::Cosine) => Some(self.cosine_spectral),
            (FeatureFamily::Mfcc, MetricKind::DtwNormalized) => Some(self.dtw_mfcc),
            (FeatureFamily::Chroma, MetricKind::DtwNormalized) => Some(self.dtw_chroma),
            (FeatureFamily::SpectralShape, MetricKind::DtwNormalized) => None,
        }
    }
}

/// What to do with a fused score that falls below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Report `max(0, min(100, score))`
    #[default]
    Clamped,
    /// Report the weighted sum as-is, negative values included
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Risk::Low => write!(f, "LOW"),
            Risk::Medium => write!(f, "MEDIUM"),
            Risk::High => write!(f, "HIGH"),
        }
    }
}

/// Thresholds are inclusive on their lower edge.
pub fn classify(score: f64, medium_threshold: f64, high_threshold: f64) -> Risk {
    if score >= high_threshold {
        Risk::High
    } else if score >= medium_threshold {
        Risk::Medium
    } else {
        Risk::Low
    }
}

/// Output of [`fuse`].
///
/// `risk` comes from the unrounded `score`, not from `similarity_percent`.
/// A score of 39.996 is therefore shown as 40.00 yet classified Low; the
/// displayed figure is presentation only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    /// Weighted sum x 100 before the policy is applied
    pub raw_score: f64,
    /// Score after the policy, unrounded; risk is classified from this
    pub score: f64,
    /// `score` rounded to two decimals
    pub similarity_percent: f64,
    pub risk: Risk,
}

/// Combine the per-family metrics into one score.
///
/// Every signal with a non-zero weight must be present in `metrics`;
/// extra or zero-weighted signals are ignored.
pub fn fuse(
    metrics: &[MetricResult],
    weights: &FusionWeights,
    policy: ScorePolicy,
    medium_threshold: f64,
    high_threshold: f64,
) -> Result<FusedScore> {
    let mut sum = 0.0;

    for family in [FeatureFamily::Mfcc, FeatureFamily::Chroma, FeatureFamily::SpectralShape] {
        for kind in [MetricKind::Cosine, MetricKind::DtwNormalized] {
            let weight = match weights.weight_for(family, kind) {
                Some(w) if w > 0.0 => w,
                _ => continue,
            };

            let metric = metrics
                .iter()
                .find(|m| m.family == family && m.kind == kind)
                .ok_or_else(|| {
                    SimilarityError::Computation(format!("missing {:?} metric for {}", kind, family))
                })?;

            sum += weight * metric.value;
        }
    }

    let raw_score = sum * 100.0;
    let score = match policy {
        ScorePolicy::Clamped => raw_score.clamp(0.0, 100.0),
        ScorePolicy::Raw => raw_score,
    };

    Ok(FusedScore {
        raw_score,
        score,
        similarity_percent: round2(score),
        risk: classify(score, medium_threshold, high_threshold),
    })
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
