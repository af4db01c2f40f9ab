//! Short-time Fourier transform
//!
//! Centered framing (the signal is zero-padded by `n_fft / 2` on both ends),
//! periodic Hann window, magnitudes of the non-negative frequency bins.
//! A signal of `n` samples yields `1 + n / hop` frames; an empty signal
//! yields none.

use rustfft::{num_complex::Complex, FftPlanner};

/// Magnitude spectrogram, one `Vec` of `n_fft / 2 + 1` bins per frame.
#[derive(Debug, Clone, Default)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f64>>,
    pub n_fft: usize,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Squared magnitudes.
    pub fn power(&self) -> Vec<Vec<f64>> {
        self.frames
            .iter()
            .map(|frame| frame.iter().map(|m| m * m).collect())
            .collect()
    }
}

/// Periodic Hann window (the DFT-even variant used for spectral analysis)
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Centre frequency in Hz of each STFT bin.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

pub fn stft(samples: &[f64], n_fft: usize, hop: usize) -> Spectrogram {
    if samples.is_empty() || n_fft == 0 || hop == 0 {
        return Spectrogram {
            frames: Vec::new(),
            n_fft,
        };
    }

    let pad = n_fft / 2;
    let mut padded = vec![0.0; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let num_frames = 1 + (padded.len() - n_fft) / hop;
    let n_bins = n_fft / 2 + 1;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);
    let window = hann_window(n_fft);

    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); n_fft];

    for i in 0..num_frames {
        let start = i * hop;
        for (slot, (&s, &w)) in buffer
            .iter_mut()
            .zip(padded[start..start + n_fft].iter().zip(window.iter()))
        {
            *slot = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);

        frames.push(buffer[..n_bins].iter().map(|c| c.norm()).collect());
    }

    Spectrogram { frames, n_fft }
}
