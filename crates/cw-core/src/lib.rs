//! cw-core: Shared types for ClearWave
//!
//! Sample and block types, the shared noise-reduction strength, and the
//! sample-rate / block-size options used by every other crate.

mod block;
mod error;
mod params;

pub use block::*;
pub use error::*;
pub use params::*;

/// Type alias for audio samples (the transport delivers 32-bit float)
pub type Sample = f32;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a raw rate onto a supported option
    pub fn from_u32(rate: u32) -> CoreResult<Self> {
        match rate {
            44100 => Ok(Self::Hz44100),
            48000 => Ok(Self::Hz48000),
            88200 => Ok(Self::Hz88200),
            96000 => Ok(Self::Hz96000),
            other => Err(CoreError::InvalidSampleRate(other)),
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Time available to process one block, in milliseconds
#[inline]
pub fn block_deadline_ms(frames: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64 * 1000.0
}
