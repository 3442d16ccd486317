//! Spectral noise gate - suppress low-magnitude bins of one channel
//!
//! Each call is independent of the previous one: transform the whole block,
//! keep the bins whose magnitude is above `mean * strength`, soften the
//! keep-mask with a short Hann kernel so neighbouring bins fade instead of
//! switching, and transform back.

use std::fmt;
use std::sync::Arc;

use cw_core::Sample;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::error::{DspError, DspResult};
use crate::ChannelGate;

/// Mask smoothing kernel: `hann(5)` normalized to unit sum
pub const SMOOTHING_KERNEL: [f32; 5] = [0.0, 0.25, 0.5, 0.25, 0.0];

const HALF_KERNEL: isize = (SMOOTHING_KERNEL.len() / 2) as isize;

/// Transforms and scratch for one block length
struct GatePlan {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    /// Forward input (overwritten by the transform)
    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    mask: Vec<f32>,
    smoothed: Vec<f32>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl GatePlan {
    fn new(planner: &mut RealFftPlanner<f32>, len: usize) -> Self {
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let bins = len / 2 + 1;

        Self {
            len,
            time: forward.make_input_vec(),
            spectrum: forward.make_output_vec(),
            mask: vec![0.0; bins],
            smoothed: vec![0.0; bins],
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            forward,
            inverse,
        }
    }
}

/// Frequency-domain noise gate for one channel of a block
pub struct SpectralGate {
    planner: RealFftPlanner<f32>,
    plan: Option<GatePlan>,
}

impl SpectralGate {
    /// Create an unplanned gate; call [`ChannelGate::prepare`] before gating
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            plan: None,
        }
    }

    /// Create a gate planned for `block_len` samples
    pub fn with_len(block_len: usize) -> DspResult<Self> {
        let mut gate = Self::new();
        gate.prepare(block_len)?;
        Ok(gate)
    }

    /// Planned block length (0 when unplanned)
    pub fn block_len(&self) -> usize {
        self.plan.as_ref().map(|p| p.len).unwrap_or(0)
    }

    /// Smoothed mask from the most recent call, one value per bin
    pub fn last_mask(&self) -> &[f32] {
        self.plan.as_ref().map(|p| p.smoothed.as_slice()).unwrap_or(&[])
    }
}

impl Default for SpectralGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpectralGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralGate")
            .field("block_len", &self.block_len())
            .finish()
    }
}

impl ChannelGate for SpectralGate {
    fn prepare(&mut self, block_len: usize) -> DspResult<()> {
        if block_len == 0 {
            return Err(DspError::InvalidConfig(
                "block length must be non-zero".into(),
            ));
        }
        if self.block_len() != block_len {
            self.plan = Some(GatePlan::new(&mut self.planner, block_len));
            log::debug!("Spectral gate planned for {} samples", block_len);
        }
        Ok(())
    }

    fn gate(&mut self, input: &[Sample], strength: f32, output: &mut [Sample]) -> DspResult<()> {
        let plan = self.plan.as_mut().ok_or(DspError::BufferMismatch {
            expected: 0,
            got: input.len(),
        })?;

        if input.len() != plan.len {
            return Err(DspError::BufferMismatch {
                expected: plan.len,
                got: input.len(),
            });
        }
        if output.len() != plan.len {
            return Err(DspError::BufferMismatch {
                expected: plan.len,
                got: output.len(),
            });
        }
        if input.iter().any(|s| !s.is_finite()) {
            return Err(DspError::NonFiniteInput);
        }
        if !strength.is_finite() {
            return Err(DspError::InvalidConfig(format!(
                "strength must be finite, got {}",
                strength
            )));
        }

        plan.time.copy_from_slice(input);
        plan.forward
            .process_with_scratch(&mut plan.time, &mut plan.spectrum, &mut plan.forward_scratch)
            .map_err(|_| DspError::Transform("forward"))?;

        let bins = plan.spectrum.len();
        let mean = plan.spectrum.iter().map(|c| c.norm()).sum::<f32>() / bins as f32;
        let threshold = mean * strength.clamp(0.0, 1.0);

        // Zero threshold keeps everything, including bins of exactly zero magnitude
        for (keep, bin) in plan.mask.iter_mut().zip(&plan.spectrum) {
            *keep = if threshold <= 0.0 || bin.norm() > threshold {
                1.0
            } else {
                0.0
            };
        }

        smooth_mask(&plan.mask, &mut plan.smoothed);

        for (bin, &gain) in plan.spectrum.iter_mut().zip(&plan.smoothed) {
            *bin *= gain;
        }

        // A real signal has no imaginary DC (or Nyquist) component
        plan.spectrum[0].im = 0.0;
        if plan.len % 2 == 0 {
            plan.spectrum[bins - 1].im = 0.0;
        }

        plan.inverse
            .process_with_scratch(&mut plan.spectrum, output, &mut plan.inverse_scratch)
            .map_err(|_| DspError::Transform("inverse"))?;

        let norm = 1.0 / plan.len as f32;
        for sample in output.iter_mut() {
            *sample *= norm;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "SpectralGate"
    }
}

/// Same-length convolution of the mask with [`SMOOTHING_KERNEL`], zero padded
fn smooth_mask(mask: &[f32], smoothed: &mut [f32]) {
    let len = mask.len() as isize;

    for (i, out) in smoothed.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (k, &weight) in SMOOTHING_KERNEL.iter().enumerate() {
            let j = i as isize + HALF_KERNEL - k as isize;
            if (0..len).contains(&j) {
                acc += mask[j as usize] * weight;
            }
        }
        *out = acc;
    }
}
