//! Feature extractors
//!
//! Three independent views of a signal, each a coefficient-by-frame matrix:
//!
//! | Family | Rows | Captures |
//! |--------|------|----------|
//! | Chroma | 12 | pitch-class energy, octave folded |
//! | MFCC | 13-20 | timbre / short-term spectral envelope |
//! | Spectral shape | 3 | centroid, bandwidth, rolloff |
//!
//! All three share the STFT framing from [`super::stft`], so equal-length
//! signals give equal frame counts in every family. Silent or empty input
//! never fails: it produces zero (or constant) matrices and the degenerate
//! handling further down the pipeline takes care of the rest.

use super::loader::AudioSignal;
use super::stft::{fft_frequencies, stft};
use crate::config::{HOP_LENGTH, N_CHROMA, N_FFT, N_MELS, ROLLOFF_PERCENT, SAMPLE_RATE, TOP_DB};
use serde::Serialize;
use std::fmt;

/// Chroma filter centre, in octaves above A0/16 (~C5 region)
const CHROMA_CENTER_OCTAVE: f64 = 5.0;
/// Gaussian octave weighting width
const CHROMA_OCTAVE_WIDTH: f64 = 2.0;
/// Floor for power values before taking logs
const AMIN: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    Chroma,
    Mfcc,
    SpectralShape,
}

impl fmt::Display for FeatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureFamily::Chroma => write!(f, "chroma"),
            FeatureFamily::Mfcc => write!(f, "mfcc"),
            FeatureFamily::SpectralShape => write!(f, "spectral"),
        }
    }
}

/// Coefficient-by-time matrix, stored frame-major.
///
/// `frames()[t][c]` is coefficient `c` at frame `t`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    n_coefficients: usize,
    frames: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn from_frames(n_coefficients: usize, frames: Vec<Vec<f64>>) -> Self {
        debug_assert!(frames.iter().all(|f| f.len() == n_coefficients));
        Self {
            n_coefficients,
            frames,
        }
    }

    /// Build from coefficient-major rows (one row per coefficient).
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n_coefficients = rows.len();
        let n_frames = rows.first().map_or(0, |r| r.len());
        let frames = (0..n_frames)
            .map(|t| rows.iter().map(|row| row[t]).collect())
            .collect();
        Self {
            n_coefficients,
            frames,
        }
    }

    pub fn n_coefficients(&self) -> usize {
        self.n_coefficients
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Vec<f64>] {
        &self.frames
    }
}

/// A feature family that turns a signal into a [`FeatureMatrix`].
///
/// Implementations are stateless after construction and shared across
/// threads, so the families of one request can run in parallel.
pub trait FeatureExtractor: Send + Sync {
    fn family(&self) -> FeatureFamily;
    fn extract(&self, signal: &AudioSignal) -> FeatureMatrix;
}

// =============================================================================
// Chroma
// =============================================================================

/// STFT chroma: power spectrum folded onto 12 pitch classes (C first),
/// each frame scaled so its strongest class is 1.0.
pub struct ChromaExtractor {
    filterbank: Vec<Vec<f64>>,
}

impl ChromaExtractor {
    pub fn new() -> Self {
        Self {
            filterbank: chroma_filterbank(SAMPLE_RATE, N_FFT, N_CHROMA),
        }
    }
}

impl Default for ChromaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for ChromaExtractor {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Chroma
    }

    fn extract(&self, signal: &AudioSignal) -> FeatureMatrix {
        let power = stft(signal.samples(), N_FFT, HOP_LENGTH).power();

        let frames = power
            .iter()
            .map(|frame| {
                let mut chroma = apply_filterbank(frame, &self.filterbank);
                let peak = chroma.iter().cloned().fold(0.0f64, f64::max);
                // Silent frames stay all-zero
                if peak > f64::MIN_POSITIVE {
                    chroma.iter_mut().for_each(|c| *c /= peak);
                }
                chroma
            })
            .collect();

        FeatureMatrix::from_frames(N_CHROMA, frames)
    }
}

fn hz_to_octs(freq: f64) -> f64 {
    (freq / (440.0 / 16.0)).log2()
}

/// Chroma filterbank, `n_chroma` rows by `n_fft / 2 + 1` bins.
///
/// Each FFT bin spreads into the pitch classes around it with a Gaussian
/// whose width follows the bin spacing, columns are L2-normalised, and an
/// octave-domain Gaussian centred on [`CHROMA_CENTER_OCTAVE`] de-weights the
/// extremes of the spectrum. Rows are rotated so index 0 is C.
fn chroma_filterbank(sample_rate: u32, n_fft: usize, n_chroma: usize) -> Vec<Vec<f64>> {
    let n_chroma_f = n_chroma as f64;

    let mut frqbins: Vec<f64> = (1..n_fft)
        .map(|k| n_chroma_f * hz_to_octs(k as f64 * sample_rate as f64 / n_fft as f64))
        .collect();
    // DC has no pitch; place it 1.5 octaves below the first bin
    let dc = frqbins[0] - 1.5 * n_chroma_f;
    frqbins.insert(0, dc);

    let mut binwidths: Vec<f64> = frqbins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
    binwidths.push(1.0);

    let half = (n_chroma_f / 2.0).round();
    let mut weights = vec![vec![0.0; n_fft]; n_chroma];

    for (k, (&fb, &width)) in frqbins.iter().zip(binwidths.iter()).enumerate() {
        let mut norm = 0.0;
        for (c, row) in weights.iter_mut().enumerate() {
            let d = (fb - c as f64 + half + 10.0 * n_chroma_f).rem_euclid(n_chroma_f) - half;
            let w = (-0.5 * (2.0 * d / width).powi(2)).exp();
            row[k] = w;
            norm += w * w;
        }
        let norm = norm.sqrt();

        let octave = (-0.5 * ((fb / n_chroma_f - CHROMA_CENTER_OCTAVE) / CHROMA_OCTAVE_WIDTH).powi(2)).exp();
        for row in weights.iter_mut() {
            if norm > 0.0 {
                row[k] /= norm;
            }
            row[k] *= octave;
        }
    }

    // Octave math above is anchored at A; rotate so C comes first
    let shift = 3 * (n_chroma / 12);
    let n_bins = n_fft / 2 + 1;
    (0..n_chroma)
        .map(|c| weights[(c + shift) % n_chroma][..n_bins].to_vec())
        .collect()
}

// =============================================================================
// MFCC
// =============================================================================

/// MFCCs from a Slaney-normalised mel power spectrogram in dB (80 dB range),
/// orthonormal DCT-II, first `n_mfcc` coefficients.
pub struct MfccExtractor {
    n_mfcc: usize,
    mel_filterbank: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
}

impl MfccExtractor {
    pub fn new(n_mfcc: usize) -> Self {
        Self {
            n_mfcc,
            mel_filterbank: mel_filterbank(SAMPLE_RATE, N_FFT, N_MELS),
            dct: dct_ortho_matrix(n_mfcc, N_MELS),
        }
    }

    pub fn n_mfcc(&self) -> usize {
        self.n_mfcc
    }
}

impl FeatureExtractor for MfccExtractor {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Mfcc
    }

    fn extract(&self, signal: &AudioSignal) -> FeatureMatrix {
        let power = stft(signal.samples(), N_FFT, HOP_LENGTH).power();

        let mut log_mel: Vec<Vec<f64>> = power
            .iter()
            .map(|frame| {
                apply_filterbank(frame, &self.mel_filterbank)
                    .into_iter()
                    .map(|p| 10.0 * p.max(AMIN).log10())
                    .collect()
            })
            .collect();

        // Dynamic range is clipped against the loudest cell of the whole clip
        let max_db = log_mel
            .iter()
            .flatten()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = max_db - TOP_DB;
        for v in log_mel.iter_mut().flatten() {
            *v = v.max(floor);
        }

        let frames = log_mel
            .iter()
            .map(|bands| apply_filterbank(bands, &self.dct))
            .collect();

        FeatureMatrix::from_frames(self.n_mfcc, frames)
    }
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_logstep() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_logstep()
    } else {
        hz / MEL_F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_logstep() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        mel * MEL_F_SP
    }
}

/// Triangular mel filters from 0 Hz to Nyquist, area-normalised.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);

    let mel_f: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (mel_f[m], mel_f[m + 1], mel_f[m + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Rows of the orthonormal DCT-II, truncated to `n_out` coefficients.
fn dct_ortho_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| {
                    scale * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos()
                })
                .collect()
        })
        .collect()
}

// =============================================================================
// Spectral shape
// =============================================================================

/// Per-frame spectral centroid, bandwidth and rolloff stacked as 3 rows.
pub struct SpectralShapeExtractor {
    frequencies: Vec<f64>,
}

impl SpectralShapeExtractor {
    pub fn new() -> Self {
        Self {
            frequencies: fft_frequencies(SAMPLE_RATE, N_FFT),
        }
    }
}

impl Default for SpectralShapeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for SpectralShapeExtractor {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::SpectralShape
    }

    fn extract(&self, signal: &AudioSignal) -> FeatureMatrix {
        let spec = stft(signal.samples(), N_FFT, HOP_LENGTH);
        let n = spec.num_frames();

        let mut centroids = Vec::with_capacity(n);
        let mut bandwidths = Vec::with_capacity(n);
        let mut rolloffs = Vec::with_capacity(n);

        for mags in &spec.frames {
            let centroid = spectral_centroid(mags, &self.frequencies);
            centroids.push(centroid);
            bandwidths.push(spectral_bandwidth(mags, &self.frequencies, centroid));
            rolloffs.push(spectral_rolloff(mags, &self.frequencies, ROLLOFF_PERCENT));
        }

        FeatureMatrix::from_rows(&[centroids, bandwidths, rolloffs])
    }
}

/// Magnitude-weighted mean frequency. 0 Hz for a silent frame.
fn spectral_centroid(mags: &[f64], freqs: &[f64]) -> f64 {
    let total: f64 = mags.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    mags.iter().zip(freqs).map(|(m, f)| m * f).sum::<f64>() / total
}

/// Magnitude-weighted standard deviation around the centroid.
fn spectral_bandwidth(mags: &[f64], freqs: &[f64], centroid: f64) -> f64 {
    let total: f64 = mags.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    mags.iter()
        .zip(freqs)
        .map(|(m, f)| (m / total) * (f - centroid).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Lowest frequency below which `percent` of the frame's magnitude lies.
fn spectral_rolloff(mags: &[f64], freqs: &[f64], percent: f64) -> f64 {
    let total: f64 = mags.iter().sum();
    let threshold = percent * total;
    let mut cumulative = 0.0;
    for (m, f) in mags.iter().zip(freqs) {
        cumulative += m;
        if cumulative >= threshold {
            return *f;
        }
    }
    freqs.last().copied().unwrap_or(0.0)
}

/// Matrix-vector product: one output per filter row.
fn apply_filterbank(input: &[f64], filterbank: &[Vec<f64>]) -> Vec<f64> {
    filterbank
        .iter()
        .map(|filt| filt.iter().zip(input.iter()).map(|(&w, &x)| w * x).sum())
        .collect()
}
