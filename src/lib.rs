//! soundalike - Score how similar two recordings are
//!
//! soundalike compares two audio recordings and reports a similarity score
//! in percent together with a coarse plagiarism risk tier.
//!
//! # Overview
//!
//! Both inputs are decoded to mono at 22050 Hz and cut to the same length.
//! Three feature families are extracted from each:
//!
//! 1. **Chroma**: 12 pitch-class energies per frame. Captures harmony and
//!    melody regardless of timbre.
//!
//! 2. **MFCC**: 13-20 cepstral coefficients per frame. Captures timbre and
//!    the spectral envelope.
//!
//! 3. **Spectral shape**: centroid, bandwidth and rolloff per frame.
//!    Captures brightness.
//!
//! Each family is projected onto its top 3 principal components, then
//! compared with cosine similarity and (for MFCC and chroma) dynamic time
//! warping. A weighted sum of the five resulting numbers is the final score.
//!
//! # Quick Start
//!
//! ```no_run
//! use soundalike::{Analyzer, Risk};
//!
//! let analyzer = Analyzer::new();
//! let record = analyzer.compare_files("original.wav", "upload.mp3")?;
//!
//! match record.risk {
//!     Risk::Low => println!("Probably unrelated"),
//!     Risk::Medium => println!("Worth a listen"),
//!     Risk::High => println!("Very likely the same material"),
//! }
//!
//! println!("Similarity: {:.2}%", record.similarity_percent);
//! # Ok::<(), soundalike::SimilarityError>(())
//! ```
//!
//! # Scoring System
//!
//! | Metric | Weight |
//! |--------|--------|
//! | cosine(MFCC) | 0.35 |
//! | cosine(chroma) | 0.25 |
//! | cosine(spectral) | 0.15 |
//! | DTW(MFCC), normalised | 0.15 |
//! | DTW(chroma), normalised | 0.10 |
//!
//! | Score Range | Risk |
//! |-------------|------|
//! | below 40 | LOW |
//! | 40 to below 75 | MEDIUM |
//! | 75 and above | HIGH |
//!
//! # Modules
//!
//! - [`analyzer`]: Loading, feature extraction, reduction, metrics, fusion
//! - [`config`]: Analysis constants and [`AnalysisConfig`]
//! - [`report`]: Output formatters (JSON, CSV)
//! - [`serve`]: HTTP endpoint

pub mod analyzer;
pub mod config;
pub mod error;
pub mod report;
pub mod serve;

pub use analyzer::fusion::{FusionWeights, Risk, ScorePolicy};
pub use analyzer::loader::AudioSignal;
pub use analyzer::{Analyzer, ScoreRecord};
pub use config::AnalysisConfig;
pub use error::{Result, SimilarityError};
