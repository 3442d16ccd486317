//! Error types for ClearWave core types

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Block shape mismatch: expected {expected_frames}x{expected_channels}, got {frames}x{channels}")]
    ShapeMismatch {
        expected_frames: usize,
        expected_channels: usize,
        frames: usize,
        channels: usize,
    },

    #[error("Interleaved buffer length mismatch: expected {expected}, got {got}")]
    InterleavedLength { expected: usize, got: usize },
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
