//! Output peak normalization

use cw_core::{AudioBlock, Sample};

use crate::error::{DspError, DspResult};

/// Scales each block so its peak sits exactly at the headroom.
///
/// There is no gain smoothing between blocks; quiet blocks are brought up
/// as far as loud ones are brought down.
#[derive(Debug, Clone, Copy)]
pub struct OutputNormalizer {
    headroom: f32,
}

impl OutputNormalizer {
    /// Normalizer targeting `headroom` (must be positive)
    pub fn new(headroom: f32) -> DspResult<Self> {
        if !(headroom.is_finite() && headroom > 0.0) {
            return Err(DspError::InvalidConfig(format!(
                "headroom must be positive, got {}",
                headroom
            )));
        }
        Ok(Self { headroom })
    }

    /// Target peak
    pub fn headroom(&self) -> f32 {
        self.headroom
    }

    /// Normalize a whole block across all channels. Returns the applied gain.
    pub fn normalize(&self, block: &mut AudioBlock) -> f32 {
        self.normalize_samples(block.samples_mut())
    }

    /// Normalize a flat sample buffer. Silence is left alone (gain 1).
    pub fn normalize_samples(&self, samples: &mut [Sample]) -> f32 {
        let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        if peak <= 0.0 || !peak.is_finite() {
            return 1.0;
        }

        let gain = self.headroom / peak;
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
        gain
    }
}

impl Default for OutputNormalizer {
    fn default() -> Self {
        Self {
            headroom: crate::DEFAULT_HEADROOM,
        }
    }
}
