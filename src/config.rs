//! Analysis constants and tunables
//!
//! Every fixed number the pipeline depends on lives here so it can be tuned
//! and tested apart from the logic that uses it.

use crate::analyzer::fusion::{FusionWeights, ScorePolicy};
use crate::error::{Result, SimilarityError};

/// Analysis sample rate. Every source is resampled to this before extraction.
pub const SAMPLE_RATE: u32 = 22050;

/// STFT frame length in samples.
pub const N_FFT: usize = 2048;

/// STFT hop in samples.
pub const HOP_LENGTH: usize = 512;

/// Mel bands feeding the MFCC DCT.
pub const N_MELS: usize = 128;

pub const DEFAULT_N_MFCC: usize = 13;
pub const MIN_N_MFCC: usize = 13;
pub const MAX_N_MFCC: usize = 20;

/// Pitch classes per chroma frame.
pub const N_CHROMA: usize = 12;

/// Fraction of spectral energy below the rolloff frequency.
pub const ROLLOFF_PERCENT: f64 = 0.85;

/// Dynamic range kept when converting mel power to dB.
pub const TOP_DB: f64 = 80.0;

/// Principal components kept per feature family.
pub const PCA_COMPONENTS: usize = 3;

/// Empirical DTW ceiling. Distances at or above it map to zero similarity.
/// This is a heuristic scale picked from observed distances between
/// unrelated tracks, not a derived bound.
pub const DTW_MAX_DISTANCE: f64 = 50_000.0;

/// Length of the silent signal substituted for an undecodable source
/// (one second at [`SAMPLE_RATE`]).
pub const FALLBACK_SIGNAL_LEN: usize = SAMPLE_RATE as usize;

/// Largest source accepted from disk or an upload (256 MiB).
pub const MAX_SOURCE_BYTES: u64 = 256 * 1024 * 1024;

/// Points in a waveform preview.
pub const WAVEFORM_POINTS: usize = 200;

/// Scores below this are Low risk.
pub const MEDIUM_RISK_THRESHOLD: f64 = 40.0;

/// Scores at or above this are High risk.
pub const HIGH_RISK_THRESHOLD: f64 = 75.0;

/// File extensions picked up when a directory is scanned.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "flac", "wav", "wave", "mp3", "m4a", "mp4", "aac", "ogg", "oga", "alac",
];

/// Case-insensitive check against [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Tunable parameters for one comparison.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Cepstral coefficients per MFCC frame (13..=20)
    pub n_mfcc: usize,
    pub weights: FusionWeights,
    pub score_policy: ScorePolicy,
    pub dtw_max_distance: f64,
    /// Sakoe-Chiba band half-width for DTW; `None` runs the full recurrence
    pub dtw_window: Option<usize>,
    pub medium_threshold: f64,
    pub high_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_mfcc: DEFAULT_N_MFCC,
            weights: FusionWeights::default(),
            score_policy: ScorePolicy::default(),
            dtw_max_distance: DTW_MAX_DISTANCE,
            dtw_window: None,
            medium_threshold: MEDIUM_RISK_THRESHOLD,
            high_threshold: HIGH_RISK_THRESHOLD,
        }
    }
}

impl AnalysisConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_N_MFCC..=MAX_N_MFCC).contains(&self.n_mfcc) {
            return Err(SimilarityError::InvalidConfig(format!(
                "n_mfcc must be between {} and {}, got {}",
                MIN_N_MFCC, MAX_N_MFCC, self.n_mfcc
            )));
        }

        if !self.dtw_max_distance.is_finite() || self.dtw_max_distance <= 0.0 {
            return Err(SimilarityError::InvalidConfig(format!(
                "dtw_max_distance must be positive, got {}",
                self.dtw_max_distance
            )));
        }

        if !(self.medium_threshold < self.high_threshold) {
            return Err(SimilarityError::InvalidConfig(format!(
                "medium threshold ({}) must be below high threshold ({})",
                self.medium_threshold, self.high_threshold
            )));
        }

        self.weights.validate()
    }
}
