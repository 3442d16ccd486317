//! ClearWave block DSP
//!
//! The per-block noise removal chain that runs inside the audio callback:
//!
//! ## Spectral gate
//! - Forward real FFT per channel
//! - Mean-magnitude threshold scaled by the noise-reduction strength
//! - Keep-mask smoothed with a 5-tap Hann kernel
//! - Masked inverse FFT back to the time domain
//!
//! ## Crossfade
//! - Linear blend of the block head with the tail of the previous block
//!
//! ## Output normalization
//! - Peak normalization to a fixed headroom
//!
//! [`BlockPipeline`] runs the three stages in order, owns the previous-block
//! state and falls back to passing the input through when a block fails.

#![warn(missing_docs)]

mod crossfade;
mod error;
mod gate;
mod normalize;
mod pipeline;

pub use crossfade::BlockCrossfader;
pub use error::{DspError, DspResult};
pub use gate::{SMOOTHING_KERNEL, SpectralGate};
pub use normalize::OutputNormalizer;
pub use pipeline::{BlockPipeline, BlockStatus, FaultKind, TransformFaults};

use cw_core::Sample;
use serde::{Deserialize, Serialize};

/// Default fraction of the block blended with the previous block
pub const DEFAULT_OVERLAP: f32 = 0.5;

/// Default output peak after normalization
pub const DEFAULT_HEADROOM: f32 = 0.9;

/// Pipeline configuration, fixed for a stream session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Crossfade overlap as a fraction of the block, in (0, 1)
    pub overlap: f32,
    /// Output peak after normalization
    pub headroom: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            headroom: DEFAULT_HEADROOM,
        }
    }
}

impl PipelineConfig {
    /// Check ranges
    pub fn validate(&self) -> DspResult<()> {
        if !(self.overlap.is_finite() && self.overlap > 0.0 && self.overlap < 1.0) {
            return Err(DspError::InvalidConfig(format!(
                "overlap must be in (0, 1), got {}",
                self.overlap
            )));
        }
        if !(self.headroom.is_finite() && self.headroom > 0.0) {
            return Err(DspError::InvalidConfig(format!(
                "headroom must be positive, got {}",
                self.headroom
            )));
        }
        Ok(())
    }
}

/// Per-channel gating stage
///
/// One instance is reused for every channel of a block, so implementations
/// must not carry state from one call to the next.
pub trait ChannelGate: Send {
    /// Allocate for a block length. Called once per session, outside the
    /// real-time path.
    fn prepare(&mut self, block_len: usize) -> DspResult<()>;

    /// Gate one channel of `block_len` samples into `output`
    fn gate(&mut self, input: &[Sample], strength: f32, output: &mut [Sample]) -> DspResult<()>;

    /// Processing name
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.overlap, 0.5);
        assert_eq!(config.headroom, 0.9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let bad_overlap = PipelineConfig {
            overlap: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_overlap.validate(),
            Err(DspError::InvalidConfig(_))
        ));

        let bad_headroom = PipelineConfig {
            headroom: 0.0,
            ..Default::default()
        };
        assert!(bad_headroom.validate().is_err());
    }

    #[test]
    fn test_config_partial_json() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "headroom": 0.5 }"#).unwrap();
        assert_eq!(config.overlap, DEFAULT_OVERLAP);
        assert_eq!(config.headroom, 0.5);
    }
}
