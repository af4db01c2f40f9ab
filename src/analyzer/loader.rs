//! Signal loading: decode, mix down, resample, align
//!
//! Any container/codec symphonia can probe is accepted. Output is always mono
//! `f64` at [`SAMPLE_RATE`]. A source that cannot be decoded is replaced by a
//! fixed-length silent signal so the rest of the pipeline always runs; the
//! substitution is logged and reported back through [`LoadedSignal`].

use crate::config::{FALLBACK_SIGNAL_LEN, MAX_SOURCE_BYTES, SAMPLE_RATE};
use crate::error::{Result, SimilarityError};
use rubato::{FftFixedInOut, Resampler};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Frames per resampler block.
const RESAMPLE_CHUNK: usize = 1024;

/// Mono samples at [`SAMPLE_RATE`].
///
/// An empty signal is legal: it flows through extraction as zero frames and
/// ends up as zero-norm vectors at the metric stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSignal {
    samples: Vec<f64>,
}

impl AudioSignal {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    /// Zero-filled signal of `len` samples.
    pub fn silence(len: usize) -> Self {
        Self { samples: vec![0.0; len] }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }
}

/// Result of loading one source with the fallback policy applied.
#[derive(Debug, Clone)]
pub struct LoadedSignal {
    pub signal: AudioSignal,
    /// True when the source failed to decode and silence was substituted
    pub fallback_used: bool,
}

/// Decode an in-memory audio file to a mono signal at [`SAMPLE_RATE`].
///
/// Fails with [`SimilarityError::Decode`] when the bytes cannot be probed or
/// carry no audio track. A track that decodes to zero samples is not an
/// error and yields an empty signal.
pub fn load(data: &[u8]) -> Result<AudioSignal> {
    let (samples, native_rate) = decode_mono(data)?;
    debug!("Decoded {} samples at {} Hz", samples.len(), native_rate);

    let samples = resample(&samples, native_rate, SAMPLE_RATE)?;
    Ok(AudioSignal::new(samples))
}

/// Read and decode a regular file of at most [`MAX_SOURCE_BYTES`].
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<AudioSignal> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(SimilarityError::Decode(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    check_source_size(meta.len())?;

    // The size can change between stat and read; the cap holds either way
    let mut data = Vec::with_capacity(meta.len() as usize);
    File::open(path)?
        .take(MAX_SOURCE_BYTES + 1)
        .read_to_end(&mut data)?;
    check_source_size(data.len() as u64)?;

    load(&data)
}

/// Reject sources larger than [`MAX_SOURCE_BYTES`].
pub fn check_source_size(len: u64) -> Result<()> {
    if len > MAX_SOURCE_BYTES {
        return Err(SimilarityError::Decode(format!(
            "source is {} bytes, limit is {}",
            len, MAX_SOURCE_BYTES
        )));
    }
    Ok(())
}

/// Load `data`, substituting [`AudioSignal::silence`] of
/// [`FALLBACK_SIGNAL_LEN`] samples if decoding fails.
pub fn load_or_fallback(data: &[u8], label: &str) -> LoadedSignal {
    match load(data) {
        Ok(signal) => LoadedSignal {
            signal,
            fallback_used: false,
        },
        Err(e) => fallback(label, &e),
    }
}

/// Same as [`load_or_fallback`] for a path. Unreadable files fall back too.
pub fn load_file_or_fallback<P: AsRef<Path>>(path: P) -> LoadedSignal {
    let path = path.as_ref();
    let label = path.display().to_string();
    match load_file(path) {
        Ok(signal) => LoadedSignal {
            signal,
            fallback_used: false,
        },
        Err(e) => fallback(&label, &e),
    }
}

fn fallback(label: &str, err: &SimilarityError) -> LoadedSignal {
    warn!(
        source = label,
        error = %err,
        "Could not decode audio, substituting {} samples of silence",
        FALLBACK_SIGNAL_LEN
    );
    LoadedSignal {
        signal: AudioSignal::silence(FALLBACK_SIGNAL_LEN),
        fallback_used: true,
    }
}

/// Truncate both signals to the shorter length. No padding.
pub fn align(mut a: AudioSignal, mut b: AudioSignal) -> (AudioSignal, AudioSignal) {
    let len = a.len().min(b.len());
    if a.len() != b.len() {
        debug!("Aligning signals {} / {} -> {}", a.len(), b.len(), len);
    }
    a.truncate(len);
    b.truncate(len);
    (a, b)
}

/// Peak-normalised preview of the first `points` samples, zero-padded when
/// the signal is shorter. Empty or silent signals give all zeros.
pub fn waveform_preview(signal: &AudioSignal, points: usize) -> Vec<f64> {
    let peak = signal
        .samples()
        .iter()
        .fold(0.0f64, |acc, &s| acc.max(s.abs()));

    if peak == 0.0 {
        if signal.is_empty() {
            warn!("Empty signal, waveform preview is flat");
        }
        return vec![0.0; points];
    }

    let mut preview: Vec<f64> = signal
        .samples()
        .iter()
        .take(points)
        .map(|&s| s / peak)
        .collect();
    preview.resize(points, 0.0);
    preview
}

/// Decode audio to mono PCM using symphonia (MP3, FLAC, WAV, OGG, AAC, ...)
fn decode_mono(data: &[u8]) -> Result<(Vec<f64>, u32)> {
    let cursor = std::io::Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    // No hint - let symphonia auto-detect the format
    let hint = Hint::new();

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SimilarityError::Decode(format!("unrecognised format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SimilarityError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SimilarityError::Decode("track has no sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SimilarityError::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut packets = 0usize;
    let mut failures = 0usize;
    let mut last_error = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }
        packets += 1;

        // Corrupt packets are skipped, the rest of the stream still counts
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                failures += 1;
                last_error = Some(e);
                continue;
            }
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(duration, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            let channel_count = decoded.spec().channels.count().max(1);
            buf.copy_interleaved_ref(decoded);

            for chunk in buf.samples().chunks(channel_count) {
                let mono: f64 = chunk.iter().map(|&s| s as f64).sum::<f64>() / channel_count as f64;
                samples.push(mono);
            }
        }
    }

    // A stream that yields packets but no audio is unreadable, not empty
    if samples.is_empty() && packets > 0 {
        return Err(SimilarityError::Decode(format!(
            "no decodable audio: {} of {} packet(s) failed ({})",
            failures,
            packets,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )));
    }
    if failures > 0 {
        debug!("Skipped {} corrupt packet(s) of {}", failures, packets);
    }

    Ok((samples, sample_rate))
}

/// FFT resampling through rubato, trimmed of the resampler delay so the
/// output lines up with the input.
fn resample(samples: &[f64], from_rate: u32, to_rate: u32) -> Result<Vec<f64>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedInOut::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        1,
    )
    .map_err(|e| SimilarityError::Decode(format!("resampler: {}", e)))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;

    let mut out: Vec<f64> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut pos = 0;

    while out.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0; needed];
        if pos < samples.len() {
            let end = (pos + needed).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let input = vec![chunk];
        let output = resampler
            .process(&input, None)
            .map_err(|e| SimilarityError::Decode(format!("resampler: {}", e)))?;
        out.extend_from_slice(&output[0]);
    }

    Ok(out[delay..delay + expected].to_vec())
}
