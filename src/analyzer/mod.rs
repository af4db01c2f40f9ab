//! Core comparison engine
//!
//! Pipeline for one pair of inputs:
//!
//! ```text
//! load x2 (parallel) -> align -> extract 3 families x2 (parallel)
//!     -> PCA per family -> cosine / DTW per family -> fuse -> ScoreRecord
//! ```
//!
//! Each call is self-contained: nothing is cached between comparisons and no
//! intermediate matrix outlives the call, so one [`Analyzer`] can be shared
//! freely across threads.

pub mod features;
pub mod fusion;
pub mod loader;
pub mod metrics;
pub mod reduce;
pub mod stft;

use crate::config::{AnalysisConfig, PCA_COMPONENTS, WAVEFORM_POINTS};
use crate::error::Result;
use features::{
    ChromaExtractor, FeatureExtractor, FeatureMatrix, MfccExtractor, SpectralShapeExtractor,
};
use fusion::{fuse, FusionWeights, Risk, ScorePolicy};
use loader::{align, waveform_preview, AudioSignal, LoadedSignal};
use metrics::{cosine_similarity, dtw_distance, ensure_finite, normalize_dtw, MetricKind, MetricResult};
use reduce::{reduce, ReducedVector};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Final result for one pair of recordings.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRecord {
    /// Fused score in percent, two decimals
    pub similarity_percent: f64,
    pub risk: Risk,
    pub cosine_mfcc: f64,
    pub cosine_chroma: f64,
    pub cosine_spectral: f64,
    pub dtw_mfcc_norm: f64,
    pub dtw_chroma_norm: f64,
    pub message: String,
    /// Weighted sum x 100 before clamping
    pub raw_score: f64,
    /// Raw DTW distances behind the normalised values
    pub dtw_mfcc_distance: f64,
    pub dtw_chroma_distance: f64,
    /// At least one input failed to decode and was replaced by silence
    pub fallback_used: bool,
    /// Samples per input after alignment
    pub aligned_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform1: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform2: Option<Vec<f64>>,
}

/// Per-input features, one matrix per family.
struct FamilyFeatures {
    chroma: FeatureMatrix,
    mfcc: FeatureMatrix,
    spectral: FeatureMatrix,
}

pub struct Analyzer {
    pub config: AnalysisConfig,
    /// Attach waveform previews to results
    pub include_waveform: bool,
    chroma: ChromaExtractor,
    mfcc: MfccExtractor,
    spectral: SpectralShapeExtractor,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self::from_config(AnalysisConfig::default())
    }

    pub fn from_config(config: AnalysisConfig) -> Self {
        Self {
            mfcc: MfccExtractor::new(config.n_mfcc),
            chroma: ChromaExtractor::new(),
            spectral: SpectralShapeExtractor::new(),
            include_waveform: false,
            config,
        }
    }

    pub fn with_n_mfcc(mut self, n_mfcc: usize) -> Self {
        self.config.n_mfcc = n_mfcc;
        self.mfcc = MfccExtractor::new(n_mfcc);
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.config.weights = weights;
        self
    }

    pub fn with_score_policy(mut self, policy: ScorePolicy) -> Self {
        self.config.score_policy = policy;
        self
    }

    pub fn with_dtw_max_distance(mut self, max_distance: f64) -> Self {
        self.config.dtw_max_distance = max_distance;
        self
    }

    pub fn with_dtw_window(mut self, window: Option<usize>) -> Self {
        self.config.dtw_window = window;
        self
    }

    pub fn with_thresholds(mut self, medium: f64, high: f64) -> Self {
        self.config.medium_threshold = medium;
        self.config.high_threshold = high;
        self
    }

    pub fn with_waveform(mut self, include: bool) -> Self {
        self.include_waveform = include;
        self
    }

    /// Compare two in-memory audio files. Undecodable inputs fall back to
    /// silence and the record is flagged low-confidence.
    pub fn compare_bytes(&self, first: &[u8], second: &[u8]) -> Result<ScoreRecord> {
        self.config.validate()?;
        let (a, b) = rayon::join(
            || loader::load_or_fallback(first, "file1"),
            || loader::load_or_fallback(second, "file2"),
        );
        self.compare_loaded(a, b)
    }

    /// Compare two files on disk, same fallback policy as [`Self::compare_bytes`].
    pub fn compare_files<P: AsRef<Path>, Q: AsRef<Path>>(&self, first: P, second: Q) -> Result<ScoreRecord> {
        self.config.validate()?;
        let (first, second) = (first.as_ref(), second.as_ref());
        let (a, b) = rayon::join(
            || loader::load_file_or_fallback(first),
            || loader::load_file_or_fallback(second),
        );
        self.compare_loaded(a, b)
    }

    /// Compare already-decoded signals (mono, [`crate::config::SAMPLE_RATE`]).
    pub fn compare_signals(&self, first: AudioSignal, second: AudioSignal) -> Result<ScoreRecord> {
        self.config.validate()?;
        self.compare_loaded(
            LoadedSignal {
                signal: first,
                fallback_used: false,
            },
            LoadedSignal {
                signal: second,
                fallback_used: false,
            },
        )
    }

    fn compare_loaded(&self, first: LoadedSignal, second: LoadedSignal) -> Result<ScoreRecord> {
        let (waveform1, waveform2) = if self.include_waveform {
            (
                Some(waveform_preview(&first.signal, WAVEFORM_POINTS)),
                Some(waveform_preview(&second.signal, WAVEFORM_POINTS)),
            )
        } else {
            (None, None)
        };

        let (a, b) = align(first.signal, second.signal);
        let aligned_samples = a.len();

        let (fa, fb) = rayon::join(|| self.extract_all(&a), || self.extract_all(&b));
        debug!(
            "Extracted features: {} chroma / {} mfcc / {} spectral frames per input",
            fa.chroma.n_frames(),
            fa.mfcc.n_frames(),
            fa.spectral.n_frames()
        );

        let mfcc = (reduce(&fa.mfcc, PCA_COMPONENTS), reduce(&fb.mfcc, PCA_COMPONENTS));
        let chroma = (reduce(&fa.chroma, PCA_COMPONENTS), reduce(&fb.chroma, PCA_COMPONENTS));
        let spectral = (
            reduce(&fa.spectral, PCA_COMPONENTS),
            reduce(&fb.spectral, PCA_COMPONENTS),
        );

        let cosine_mfcc = ensure_finite(cosine(&mfcc), "cosine(mfcc)")?;
        let cosine_chroma = ensure_finite(cosine(&chroma), "cosine(chroma)")?;
        let cosine_spectral = ensure_finite(cosine(&spectral), "cosine(spectral)")?;

        let window = self.config.dtw_window;
        let (dtw_mfcc, dtw_chroma) = rayon::join(
            || dtw(&mfcc, window),
            || dtw(&chroma, window),
        );
        let dtw_mfcc = ensure_finite(dtw_mfcc, "dtw(mfcc)")?;
        let dtw_chroma = ensure_finite(dtw_chroma, "dtw(chroma)")?;

        let max_distance = self.config.dtw_max_distance;
        let dtw_mfcc_norm = normalize_dtw(dtw_mfcc, max_distance);
        let dtw_chroma_norm = normalize_dtw(dtw_chroma, max_distance);

        let (mfcc_family, chroma_family) = (self.mfcc.family(), self.chroma.family());
        let metrics = [
            MetricResult::new(mfcc_family, MetricKind::Cosine, cosine_mfcc),
            MetricResult::new(chroma_family, MetricKind::Cosine, cosine_chroma),
            MetricResult::new(self.spectral.family(), MetricKind::Cosine, cosine_spectral),
            MetricResult::new(mfcc_family, MetricKind::DtwNormalized, dtw_mfcc_norm),
            MetricResult::new(chroma_family, MetricKind::DtwNormalized, dtw_chroma_norm),
        ];
        debug!(?metrics, dtw_mfcc, dtw_chroma, "Computed metrics");

        let fused = fuse(
            &metrics,
            &self.config.weights,
            self.config.score_policy,
            self.config.medium_threshold,
            self.config.high_threshold,
        )?;

        let fallback_used = first.fallback_used || second.fallback_used;
        let message = status_message(first.fallback_used, second.fallback_used);

        info!(
            raw_score = fused.raw_score,
            similarity = fused.similarity_percent,
            risk = %fused.risk,
            fallback_used,
            "Comparison complete"
        );

        Ok(ScoreRecord {
            similarity_percent: fused.similarity_percent,
            risk: fused.risk,
            cosine_mfcc,
            cosine_chroma,
            cosine_spectral,
            dtw_mfcc_norm,
            dtw_chroma_norm,
            message,
            raw_score: fused.raw_score,
            dtw_mfcc_distance: dtw_mfcc,
            dtw_chroma_distance: dtw_chroma,
            fallback_used,
            aligned_samples,
            waveform1,
            waveform2,
        })
    }

    /// The three families are independent; the joins are the barrier
    /// before reduction.
    fn extract_all(&self, signal: &AudioSignal) -> FamilyFeatures {
        let (chroma, (mfcc, spectral)) = rayon::join(
            || self.chroma.extract(signal),
            || rayon::join(|| self.mfcc.extract(signal), || self.spectral.extract(signal)),
        );
        FamilyFeatures {
            chroma,
            mfcc,
            spectral,
        }
    }
}

fn cosine(pair: &(ReducedVector, ReducedVector)) -> f64 {
    cosine_similarity(&pair.0.flatten(), &pair.1.flatten())
}

fn dtw(pair: &(ReducedVector, ReducedVector), window: Option<usize>) -> f64 {
    dtw_distance(&pair.0.flatten(), &pair.1.flatten(), window)
}

fn status_message(first_failed: bool, second_failed: bool) -> String {
    let failed: Vec<&str> = [("file1", first_failed), ("file2", second_failed)]
        .iter()
        .filter(|(_, f)| *f)
        .map(|(name, _)| *name)
        .collect();

    if failed.is_empty() {
        "Analysis complete.".to_string()
    } else {
        format!(
            "Analysis complete with low confidence: {} could not be decoded and was treated as silence.",
            failed.join(" and ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SAMPLE_RATE;

    fn tone(freq: f64, secs: f64) -> AudioSignal {
        let len = (SAMPLE_RATE as f64 * secs) as usize;
        AudioSignal::new(
            (0..len)
                .map(|i| {
                    let t = i as f64 / SAMPLE_RATE as f64;
                    // Slow amplitude sweep so frames differ and PCA has variance
                    0.5 * (2.0 * std::f64::consts::PI * freq * t).sin() * (0.5 + t / secs)
                })
                .collect(),
        )
    }

    // ==========================================================================
    // BUILDER TESTS
    // ==========================================================================

    #[test]
    fn test_builder_sets_config() {
        let analyzer = Analyzer::new()
            .with_n_mfcc(20)
            .with_weights(FusionWeights::chroma_only())
            .with_score_policy(ScorePolicy::Raw)
            .with_dtw_window(Some(10))
            .with_thresholds(30.0, 60.0)
            .with_waveform(true);

        assert_eq!(analyzer.config.n_mfcc, 20);
        assert_eq!(analyzer.mfcc.n_mfcc(), 20);
        assert_eq!(analyzer.config.weights, FusionWeights::chroma_only());
        assert_eq!(analyzer.config.score_policy, ScorePolicy::Raw);
        assert_eq!(analyzer.config.dtw_window, Some(10));
        assert_eq!(analyzer.config.medium_threshold, 30.0);
        assert!(analyzer.include_waveform);
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let analyzer = Analyzer::new().with_n_mfcc(40);
        let result = analyzer.compare_signals(tone(440.0, 0.2), tone(440.0, 0.2));
        assert!(matches!(result, Err(crate::SimilarityError::InvalidConfig(_))));
    }

    // ==========================================================================
    // PIPELINE TESTS
    // ==========================================================================

    #[test]
    fn test_identical_signals_score_high() {
        let signal = tone(440.0, 1.0);
        let record = Analyzer::new().compare_signals(signal.clone(), signal).unwrap();

        assert!((record.cosine_mfcc - 1.0).abs() < 1e-9);
        assert!((record.cosine_chroma - 1.0).abs() < 1e-9);
        assert!((record.cosine_spectral - 1.0).abs() < 1e-9);
        assert_eq!(record.dtw_mfcc_distance, 0.0);
        assert_eq!(record.dtw_chroma_distance, 0.0);
        assert_eq!(record.similarity_percent, 100.0);
        assert_eq!(record.risk, Risk::High);
        assert!(!record.fallback_used);
        assert_eq!(record.message, "Analysis complete.");
    }

    #[test]
    fn test_silent_pair_does_not_fail() {
        // Same outcome at every length: MFCC of silence is a constant -100 dB
        // floor whose PCA projection must come out as exact zeros
        for len in [4096, 22050, 44100] {
            let record = Analyzer::new()
                .compare_signals(AudioSignal::silence(len), AudioSignal::silence(len))
                .unwrap();
            assert_eq!(record.cosine_mfcc, 0.0, "len {}", len);
            assert_eq!(record.cosine_chroma, 0.0, "len {}", len);
            assert_eq!(record.cosine_spectral, 0.0, "len {}", len);
            // Zero vectors are at DTW distance 0, so only the DTW terms score
            assert_eq!(record.dtw_mfcc_norm, 1.0, "len {}", len);
            assert_eq!(record.dtw_chroma_norm, 1.0, "len {}", len);
            assert_eq!(record.similarity_percent, 25.0, "len {}", len);
            assert_eq!(record.risk, Risk::Low, "len {}", len);
        }
    }

    #[test]
    fn test_silence_against_tone_has_zero_cosine() {
        let record = Analyzer::new()
            .compare_signals(AudioSignal::silence(22050), tone(440.0, 1.0))
            .unwrap();
        assert_eq!(record.cosine_mfcc, 0.0);
        assert_eq!(record.cosine_chroma, 0.0);
        assert_eq!(record.cosine_spectral, 0.0);
        assert_eq!(record.risk, Risk::Low);
    }

    #[test]
    fn test_empty_signals_do_not_fail() {
        let record = Analyzer::new()
            .compare_signals(AudioSignal::default(), tone(440.0, 0.5))
            .unwrap();
        assert_eq!(record.aligned_samples, 0);
        assert_eq!(record.cosine_mfcc, 0.0);
        assert_eq!(record.cosine_chroma, 0.0);
        assert_eq!(record.cosine_spectral, 0.0);
    }

    #[test]
    fn test_alignment_applied() {
        let record = Analyzer::new()
            .compare_signals(tone(440.0, 1.0), tone(440.0, 0.5))
            .unwrap();
        assert_eq!(record.aligned_samples, SAMPLE_RATE as usize / 2);
    }

    #[test]
    fn test_deterministic() {
        let analyzer = Analyzer::new();
        let first = analyzer.compare_signals(tone(330.0, 0.5), tone(523.0, 0.5)).unwrap();
        let second = analyzer.compare_signals(tone(330.0, 0.5), tone(523.0, 0.5)).unwrap();
        assert_eq!(first.raw_score, second.raw_score);
        assert_eq!(first.similarity_percent, second.similarity_percent);
    }

    #[test]
    fn test_metric_ranges() {
        let record = Analyzer::new()
            .compare_signals(tone(220.0, 0.5), tone(1760.0, 0.5))
            .unwrap();
        for v in [record.cosine_mfcc, record.cosine_chroma, record.cosine_spectral] {
            assert!((-1.0..=1.0).contains(&v));
        }
        for v in [record.dtw_mfcc_norm, record.dtw_chroma_norm] {
            assert!((0.0..=1.0).contains(&v));
        }
        assert!(record.dtw_mfcc_distance >= 0.0);
        assert!((0.0..=100.0).contains(&record.similarity_percent));
    }

    #[test]
    fn test_garbage_bytes_fall_back() {
        let record = Analyzer::new().compare_bytes(b"not audio", b"also not audio").unwrap();
        assert!(record.fallback_used);
        assert_eq!(record.aligned_samples, crate::config::FALLBACK_SIGNAL_LEN);
        assert!(record.message.contains("file1 and file2"));
        // Two fallback silences are not similar material
        assert_eq!(record.cosine_mfcc, 0.0);
        assert_eq!(record.similarity_percent, 25.0);
        assert_eq!(record.risk, Risk::Low);
    }

    #[test]
    fn test_waveform_attached_when_requested() {
        let analyzer = Analyzer::new().with_waveform(true);
        let record = analyzer.compare_signals(tone(440.0, 0.2), tone(440.0, 0.2)).unwrap();
        assert_eq!(record.waveform1.as_ref().map(Vec::len), Some(WAVEFORM_POINTS));
        assert_eq!(record.waveform2.as_ref().map(Vec::len), Some(WAVEFORM_POINTS));

        let record = Analyzer::new().compare_signals(tone(440.0, 0.2), tone(440.0, 0.2)).unwrap();
        assert!(record.waveform1.is_none());
    }

    #[test]
    fn test_status_message() {
        assert_eq!(status_message(false, false), "Analysis complete.");
        assert!(status_message(true, false).contains("file1 could not"));
        assert!(status_message(false, true).contains("file2 could not"));
    }

    #[test]
    fn test_record_json_fields() {
        let signal = tone(440.0, 0.2);
        let record = Analyzer::new().compare_signals(signal.clone(), signal).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "similarity_percent",
            "risk",
            "cosine_mfcc",
            "cosine_chroma",
            "cosine_spectral",
            "dtw_mfcc_norm",
            "dtw_chroma_norm",
            "message",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json.get("waveform1").is_none());
    }
}
