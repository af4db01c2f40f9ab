//! End-to-end checks through the public API, using WAV bytes written with
//! hound so the full decode path is exercised.

use soundalike::analyzer::features::FeatureFamily;
use soundalike::analyzer::fusion::{classify, fuse};
use soundalike::analyzer::loader::align;
use soundalike::analyzer::metrics::{dtw_distance, normalize_dtw, MetricKind, MetricResult};
use soundalike::config::{HIGH_RISK_THRESHOLD, MEDIUM_RISK_THRESHOLD, SAMPLE_RATE};
use soundalike::report::{self, ComparisonRow};
use soundalike::{Analyzer, AudioSignal, FusionWeights, Risk, ScorePolicy};

fn wav_bytes(samples: &[f64]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Two-note phrase with a slow swell, so frames vary.
fn melody(secs: f64) -> Vec<f64> {
    let len = (SAMPLE_RATE as f64 * secs) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let freq = if t < secs / 2.0 { 440.0 } else { 659.25 };
            0.4 * (2.0 * std::f64::consts::PI * freq * t).sin() * (0.3 + 0.7 * t / secs)
        })
        .collect()
}

/// Deterministic full-scale white noise.
fn white_noise(len: usize, mut seed: u64) -> Vec<f64> {
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as f64 / (1u64 << 31) as f64) * 2.0 - 1.0
        })
        .collect()
}

fn metrics(values: [f64; 5]) -> Vec<MetricResult> {
    vec![
        MetricResult::new(FeatureFamily::Mfcc, MetricKind::Cosine, values[0]),
        MetricResult::new(FeatureFamily::Chroma, MetricKind::Cosine, values[1]),
        MetricResult::new(FeatureFamily::SpectralShape, MetricKind::Cosine, values[2]),
        MetricResult::new(FeatureFamily::Mfcc, MetricKind::DtwNormalized, values[3]),
        MetricResult::new(FeatureFamily::Chroma, MetricKind::DtwNormalized, values[4]),
    ]
}

// ==========================================================================
// WHOLE-PIPELINE PROPERTIES
// ==========================================================================

#[test]
fn test_identical_uploads_score_high() {
    let bytes = wav_bytes(&melody(2.0));
    let record = Analyzer::new().compare_bytes(&bytes, &bytes).unwrap();

    assert!((record.cosine_mfcc - 1.0).abs() < 1e-6);
    assert!((record.cosine_chroma - 1.0).abs() < 1e-6);
    assert!((record.cosine_spectral - 1.0).abs() < 1e-6);
    assert_eq!(record.dtw_mfcc_distance, 0.0);
    assert_eq!(record.dtw_chroma_distance, 0.0);
    assert!((record.similarity_percent - 100.0).abs() < 1e-6);
    assert_eq!(record.risk, Risk::High);
    assert!(!record.fallback_used);
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let a = wav_bytes(&melody(1.5));
    let b = wav_bytes(&white_noise(SAMPLE_RATE as usize * 3 / 2, 7));
    let analyzer = Analyzer::new();

    let first = analyzer.compare_bytes(&a, &b).unwrap();
    for _ in 0..3 {
        let again = analyzer.compare_bytes(&a, &b).unwrap();
        assert_eq!(again.similarity_percent, first.similarity_percent);
        assert_eq!(again.raw_score, first.raw_score);
        assert_eq!(again.risk, first.risk);
    }
}

#[test]
fn test_silence_vs_noise_scores_low() {
    let len = SAMPLE_RATE as usize * 2;
    let silence = wav_bytes(&vec![0.0; len]);
    let noise = wav_bytes(&white_noise(len, 42));

    let record = Analyzer::new().compare_bytes(&silence, &noise).unwrap();
    assert!(record.cosine_mfcc <= 1e-9);
    assert!(record.cosine_chroma <= 1e-9);
    assert!(record.similarity_percent < MEDIUM_RISK_THRESHOLD);
    assert_eq!(record.risk, Risk::Low);
}

#[test]
fn test_empty_and_silent_inputs_do_not_fail() {
    let analyzer = Analyzer::new();

    let empty = wav_bytes(&[]);
    let tone = wav_bytes(&melody(0.5));
    let record = analyzer.compare_bytes(&empty, &tone).unwrap();
    assert_eq!(record.cosine_mfcc, 0.0);
    assert_eq!(record.cosine_chroma, 0.0);
    assert_eq!(record.cosine_spectral, 0.0);

    for len in [4096, 22050, 44100] {
        let record = analyzer
            .compare_signals(AudioSignal::silence(len), AudioSignal::silence(len))
            .unwrap();
        assert_eq!(record.cosine_mfcc, 0.0, "len {}", len);
        assert_eq!(record.similarity_percent, 25.0, "len {}", len);
        assert_eq!(record.risk, Risk::Low, "len {}", len);
    }
}

#[test]
fn test_two_undecodable_uploads_score_low() {
    let record = Analyzer::new().compare_bytes(b"garbage one", b"garbage two").unwrap();
    assert!(record.fallback_used);
    assert_eq!(record.cosine_mfcc, 0.0);
    assert_eq!(record.cosine_chroma, 0.0);
    assert_eq!(record.similarity_percent, 25.0);
    assert_eq!(record.risk, Risk::Low);
}

#[test]
fn test_undecodable_upload_is_low_confidence() {
    let tone = wav_bytes(&melody(1.0));
    let record = Analyzer::new().compare_bytes(&tone, b"definitely not audio").unwrap();

    assert!(record.fallback_used);
    assert!(record.message.contains("low confidence"));
    assert!(record.message.contains("file2"));
    assert!(!record.message.contains("file1"));
}

#[test]
fn test_compare_files_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.wav");
    let b = dir.path().join("b.wav");
    std::fs::write(&a, wav_bytes(&melody(1.0))).unwrap();
    std::fs::write(&b, wav_bytes(&melody(0.75))).unwrap();

    let record = Analyzer::new().compare_files(&a, &b).unwrap();
    assert_eq!(record.aligned_samples, (SAMPLE_RATE as f64 * 0.75) as usize);
    assert!((0.0..=100.0).contains(&record.similarity_percent));
}

#[test]
fn test_chroma_only_ignores_timbre_metrics() {
    let a = wav_bytes(&melody(1.0));
    let b = wav_bytes(&white_noise(SAMPLE_RATE as usize, 3));
    let record = Analyzer::new()
        .with_weights(FusionWeights::chroma_only())
        .compare_bytes(&a, &b)
        .unwrap();

    let weights = FusionWeights::chroma_only();
    let expected =
        (weights.cosine_chroma * record.cosine_chroma + weights.dtw_chroma * record.dtw_chroma_norm) * 100.0;
    assert!((record.raw_score - expected).abs() < 1e-9);
}

// ==========================================================================
// COMPONENT PROPERTIES
// ==========================================================================

#[test]
fn test_align_lengths() {
    for (la, lb) in [(0, 0), (0, 10), (10, 0), (7, 7), (100, 3), (3, 100)] {
        let (a, b) = align(AudioSignal::silence(la), AudioSignal::silence(lb));
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), la.min(lb));
    }
}

#[test]
fn test_dtw_non_negative_and_normalized_in_range() {
    let a = white_noise(64, 1);
    let b = white_noise(48, 2);
    let d = dtw_distance(&a, &b, None);
    assert!(d >= 0.0);
    for max in [1.0, 10.0, 50_000.0] {
        let n = normalize_dtw(d, max);
        assert!((0.0..=1.0).contains(&n));
    }
}

#[test]
fn test_fusion_raw_and_clamped_ranges() {
    let weights = FusionWeights::default();
    let worst = metrics([-1.0, -1.0, -1.0, 0.0, 0.0]);
    let best = metrics([1.0, 1.0, 1.0, 1.0, 1.0]);

    let raw = fuse(&worst, &weights, ScorePolicy::Raw, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD).unwrap();
    assert!((raw.raw_score + 75.0).abs() < 1e-9);
    assert!((raw.score + 75.0).abs() < 1e-9);
    assert_eq!(raw.risk, Risk::Low);

    let clamped = fuse(&worst, &weights, ScorePolicy::Clamped, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD).unwrap();
    assert!((clamped.raw_score + 75.0).abs() < 1e-9);
    assert_eq!(clamped.similarity_percent, 0.0);

    let top = fuse(&best, &weights, ScorePolicy::Clamped, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD).unwrap();
    assert!((top.similarity_percent - 100.0).abs() < 1e-9);
    assert_eq!(top.risk, Risk::High);
}

#[test]
fn test_risk_boundaries() {
    assert_eq!(classify(39.999, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD), Risk::Low);
    assert_eq!(classify(40.0, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD), Risk::Medium);
    assert_eq!(classify(74.999, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD), Risk::Medium);
    assert_eq!(classify(75.0, MEDIUM_RISK_THRESHOLD, HIGH_RISK_THRESHOLD), Risk::High);
}

// ==========================================================================
// REPORT OUTPUT
// ==========================================================================

#[test]
fn test_report_from_real_comparison() {
    let bytes = wav_bytes(&melody(0.5));
    let record = Analyzer::new().compare_bytes(&bytes, &bytes).unwrap();
    let rows = vec![ComparisonRow {
        reference: "ref.wav".to_string(),
        candidate: "copy.wav".to_string(),
        candidate_name: "copy.wav".to_string(),
        record: Some(record),
        error: None,
    }];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    report::generate(&path, &rows).unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["summary"]["high"], 1);
    assert_eq!(value["comparisons"][0]["record"]["risk"], "High");
}
