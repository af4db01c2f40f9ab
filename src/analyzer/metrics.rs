//! Similarity metrics between reduced feature sequences
//!
//! Both metrics flatten the reduced vectors row-major and truncate the longer
//! one to the shorter's length before comparing. No padding is ever applied.

use super::features::FeatureFamily;
use crate::error::{Result, SimilarityError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Cosine similarity in [-1, 1]
    Cosine,
    /// DTW distance mapped to [0, 1] against the configured ceiling
    DtwNormalized,
}

/// One scalar produced for one feature family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricResult {
    pub family: FeatureFamily,
    pub kind: MetricKind,
    pub value: f64,
}

impl MetricResult {
    pub fn new(family: FeatureFamily, kind: MetricKind, value: f64) -> Self {
        Self { family, kind, value }
    }
}

/// Cut both slices to the shorter length.
pub fn truncate_pair<'a>(a: &'a [f64], b: &'a [f64]) -> (&'a [f64], &'a [f64]) {
    let len = a.len().min(b.len());
    (&a[..len], &b[..len])
}

/// `dot(a, b) / (|a| * |b|)` over the common prefix.
///
/// Defined as 0.0 when either side has zero norm (silent or empty clip).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let (a, b) = truncate_pair(a, b);

    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Dynamic time warping distance over the common prefix with `|x - y|`
/// as the local cost.
///
/// `window` restricts the warping path to a Sakoe-Chiba band of that
/// half-width; `None` evaluates the full recurrence. Two empty sequences are
/// at distance 0.
pub fn dtw_distance(a: &[f64], b: &[f64], window: Option<usize>) -> f64 {
    let (a, b) = truncate_pair(a, b);
    let n = a.len();
    if n == 0 {
        return 0.0;
    }
    let w = window.unwrap_or(n);

    let mut prev = vec![f64::INFINITY; n + 1];
    let mut curr = vec![f64::INFINITY; n + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.iter_mut().for_each(|c| *c = f64::INFINITY);
        let lo = i.saturating_sub(w).max(1);
        let hi = (i + w).min(n);
        for j in lo..=hi {
            let cost = (a[i - 1] - b[j - 1]).abs();
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = cost + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Map a raw DTW distance to `clamp(1 - distance / max_distance, 0, 1)`.
pub fn normalize_dtw(distance: f64, max_distance: f64) -> f64 {
    (1.0 - distance / max_distance).clamp(0.0, 1.0)
}

/// Reject NaN and infinities before they reach the fuser.
pub fn ensure_finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SimilarityError::Computation(format!(
            "{} produced a non-finite value ({})",
            what, value
        )))
    }
}
