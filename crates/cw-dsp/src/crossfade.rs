//! Block crossfade - hide block-boundary discontinuities
//!
//! The head of the current block is blended with the tail of the previous
//! processed block using a pair of linear ramps. Frames past the fade are
//! left untouched.

use cw_core::AudioBlock;

use crate::error::{DspError, DspResult};

/// Linear crossfade between consecutive processed blocks
#[derive(Debug, Clone)]
pub struct BlockCrossfader {
    block_len: usize,
    fade_len: usize,
    /// 0 -> 1
    rising: Vec<f32>,
    /// 1 -> 0
    falling: Vec<f32>,
}

impl BlockCrossfader {
    /// Precompute ramps for `block_len` frames and an overlap fraction in (0, 1)
    pub fn new(block_len: usize, overlap: f32) -> DspResult<Self> {
        if !(overlap.is_finite() && overlap > 0.0 && overlap < 1.0) {
            return Err(DspError::InvalidConfig(format!(
                "overlap must be in (0, 1), got {}",
                overlap
            )));
        }

        let fade_len = (block_len as f64 * overlap as f64).floor() as usize;
        let rising = linspace(0.0, 1.0, fade_len);
        let falling = linspace(1.0, 0.0, fade_len);

        Ok(Self {
            block_len,
            fade_len,
            rising,
            falling,
        })
    }

    /// Number of blended frames at the head of each block
    pub fn fade_len(&self) -> usize {
        self.fade_len
    }

    /// Frames per block this crossfader was built for
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Blend the head of `current` with the tail of `previous`, in place
    pub fn crossfade(&self, current: &mut AudioBlock, previous: &AudioBlock) -> DspResult<()> {
        if current.frames() != self.block_len {
            return Err(DspError::BufferMismatch {
                expected: self.block_len,
                got: current.frames(),
            });
        }
        if !current.same_shape(previous) {
            return Err(DspError::ShapeChanged {
                expected: current.shape(),
                got: previous.shape(),
            });
        }
        if self.fade_len == 0 {
            return Ok(());
        }

        let tail_start = self.block_len - self.fade_len;

        for ch in 0..current.channels() {
            let tail = &previous.channel(ch)[tail_start..];
            let head = &mut current.channel_mut(ch)[..self.fade_len];

            for (i, sample) in head.iter_mut().enumerate() {
                *sample = *sample * self.rising[i] + tail[i] * self.falling[i];
            }
        }

        Ok(())
    }
}

/// `n` evenly spaced values from `start` to `stop` inclusive
fn linspace(start: f32, stop: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop as f64 - start as f64) / (n - 1) as f64;
            let mut ramp: Vec<f32> = (0..n)
                .map(|i| (start as f64 + step * i as f64) as f32)
                .collect();
            ramp[n - 1] = stop;
            ramp
        }
    }
}
