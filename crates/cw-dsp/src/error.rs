//! Error types for block processing

use thiserror::Error;

/// Block processing error types
///
/// Everything here is recoverable: the pipeline turns any of these into a
/// pass-through of the input block for that block only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Forward or inverse transform reported a failure
    #[error("{0} transform failed")]
    Transform(&'static str),

    /// Input contained NaN or infinity
    #[error("Non-finite sample in block input")]
    NonFiniteInput,

    /// Buffer size mismatch
    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferMismatch {
        /// Length the gate was prepared for
        expected: usize,
        /// Length of the slice actually passed
        got: usize,
    },

    /// Block shape differs from the shape the session was prepared with
    #[error("Block shape changed mid-session: expected {expected:?}, got {got:?}")]
    ShapeChanged {
        /// `(frames, channels)` fixed at session start
        expected: (usize, usize),
        /// `(frames, channels)` of the offending block
        got: (usize, usize),
    },
}

/// Result type for block processing
pub type DspResult<T> = Result<T, DspError>;
