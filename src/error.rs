//! Error types for the similarity pipeline
//!
//! Only failures that the caller can act on are represented here. Degenerate
//! numeric input (silent clips, zero-norm vectors, too few frames for PCA) is
//! not an error: those cases resolve to defined sentinel values inside the
//! pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimilarityError {
    /// The source could not be probed or holds no decodable audio track.
    #[error("decode error: {0}")]
    Decode(String),

    /// A reduction or metric produced something unusable (NaN, infinity,
    /// a crashed worker). Fails the whole comparison.
    #[error("computation error: {0}")]
    Computation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("analysis timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimilarityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = SimilarityError::Decode("no audio track".to_string());
        assert_eq!(e.to_string(), "decode error: no audio track");

        let e = SimilarityError::Timeout(120);
        assert_eq!(e.to_string(), "analysis timed out after 120s");
    }

    #[test]
    fn test_io_conversion() {
        fn open_missing() -> Result<Vec<u8>> {
            Ok(std::fs::read("/definitely/not/here.wav")?)
        }
        assert!(matches!(open_missing(), Err(SimilarityError::Io(_))));
    }
}
