//! Audio error types

use cw_dsp::DspError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No virtual input device found (looked for: {0})")]
    NoVirtualInput(String),

    #[error("No output device selected")]
    NoOutputSelected,

    #[error("Output device #{0} not found or has no output channels")]
    OutputNotFound(usize),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("Failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedSampleRate(u32),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] DspError),

    #[error("Failed to spawn stream thread: {0}")]
    ThreadSpawn(String),

    #[error("Stream session failed: {0}")]
    SessionFailed(String),
}

impl AudioError {
    /// True for errors raised while picking endpoints, before any device is opened
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::NoVirtualInput(_) | Self::NoOutputSelected | Self::OutputNotFound(_)
        )
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
