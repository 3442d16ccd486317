//! Block pipeline: gate each channel, crossfade, normalize
//!
//! Owns the previous-block state for the session. Any failure inside a
//! block turns that block into a pass-through of the input; the previous
//! block state is only written after the gate and crossfade succeed, so a
//! failed block never leaks into the next one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use cw_core::AudioBlock;

use crate::error::{DspError, DspResult};
use crate::{BlockCrossfader, ChannelGate, OutputNormalizer, PipelineConfig, SpectralGate};

/// Outcome of one [`BlockPipeline::process`] call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockStatus {
    /// Block went through the full chain; `gain` is the normalization gain
    Processed {
        /// Gain applied by the normalizer
        gain: f32,
    },
    /// Block failed and the input was copied to the output unchanged
    Bypassed,
}

/// Category of the most recent per-block failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultKind {
    /// No failure recorded yet
    None = 0,
    /// FFT reported an error
    Transform = 1,
    /// NaN or infinity in the input
    NonFinite = 2,
    /// Wrong block size or shape
    Shape = 3,
    /// Pipeline could not be prepared for the block
    Config = 4,
}

impl FaultKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Transform,
            2 => Self::NonFinite,
            3 => Self::Shape,
            4 => Self::Config,
            _ => Self::None,
        }
    }
}

impl From<&DspError> for FaultKind {
    fn from(err: &DspError) -> Self {
        match err {
            DspError::Transform(_) => Self::Transform,
            DspError::NonFiniteInput => Self::NonFinite,
            DspError::BufferMismatch { .. } | DspError::ShapeChanged { .. } => Self::Shape,
            DspError::InvalidConfig(_) => Self::Config,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Transform => "transform failure",
            Self::NonFinite => "non-finite input",
            Self::Shape => "block shape mismatch",
            Self::Config => "pipeline configuration",
        };
        f.write_str(name)
    }
}

/// Lock-free record of blocks that fell back to pass-through.
///
/// Written from the audio callback, read by whoever owns the stream.
#[derive(Debug, Default)]
pub struct TransformFaults {
    count: AtomicU64,
    last: AtomicU8,
}

impl TransformFaults {
    /// Record one failed block
    pub fn record(&self, err: &DspError) {
        self.last.store(FaultKind::from(err) as u8, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total failed blocks
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Kind of the most recent failure
    pub fn last_kind(&self) -> FaultKind {
        FaultKind::from_u8(self.last.load(Ordering::Relaxed))
    }

    /// Failures since `seen`, advancing `seen` to the current total
    pub fn since(&self, seen: &mut u64) -> Option<(u64, FaultKind)> {
        let total = self.count();
        if total > *seen {
            let new = total - *seen;
            *seen = total;
            Some((new, self.last_kind()))
        } else {
            None
        }
    }
}

/// Per-block noise removal chain
pub struct BlockPipeline<G: ChannelGate = SpectralGate> {
    config: PipelineConfig,
    gate: G,
    crossfader: Option<BlockCrossfader>,
    normalizer: OutputNormalizer,
    /// Gated, then crossfaded, then normalized in place
    work: AudioBlock,
    /// Last crossfaded block (before normalization)
    previous: AudioBlock,
    previous_valid: bool,
    /// (frames, channels) fixed by `prepare`
    shape: Option<(usize, usize)>,
    faults: Arc<TransformFaults>,
}

impl BlockPipeline<SpectralGate> {
    /// Pipeline with the spectral gate
    pub fn new(config: PipelineConfig) -> DspResult<Self> {
        Self::with_gate(config, SpectralGate::new())
    }
}

impl<G: ChannelGate> BlockPipeline<G> {
    /// Pipeline with a custom per-channel gate
    pub fn with_gate(config: PipelineConfig, gate: G) -> DspResult<Self> {
        config.validate()?;
        Ok(Self {
            normalizer: OutputNormalizer::new(config.headroom)?,
            config,
            gate,
            crossfader: None,
            work: AudioBlock::new(0, 0),
            previous: AudioBlock::new(0, 0),
            previous_valid: false,
            shape: None,
            faults: Arc::new(TransformFaults::default()),
        })
    }

    /// Allocate everything for a session shape. Done once per session,
    /// before the first block; the first `process` call does it lazily
    /// otherwise.
    pub fn prepare(&mut self, frames: usize, channels: usize) -> DspResult<()> {
        if frames == 0 || channels == 0 {
            return Err(DspError::InvalidConfig(format!(
                "block shape must be non-empty, got {}x{}",
                frames, channels
            )));
        }

        self.gate.prepare(frames)?;
        self.crossfader = Some(BlockCrossfader::new(frames, self.config.overlap)?);
        self.work.reshape(frames, channels);
        self.previous.reshape(frames, channels);
        self.previous_valid = false;
        self.shape = Some((frames, channels));

        log::debug!(
            "{} pipeline prepared: {} frames x {} channels, overlap {}, headroom {}",
            self.gate.name(),
            frames,
            channels,
            self.config.overlap,
            self.config.headroom
        );
        Ok(())
    }

    /// Process one block into `output`.
    ///
    /// Never fails: on error the input is copied to `output`, the failure is
    /// counted in [`TransformFaults`] and the previous-block state is left as
    /// it was before this call.
    pub fn process(&mut self, input: &AudioBlock, strength: f32, output: &mut AudioBlock) -> BlockStatus {
        if !output.same_shape(input) {
            output.reshape(input.frames(), input.channels());
        }

        match self.try_process(input, strength, output) {
            Ok(gain) => BlockStatus::Processed { gain },
            Err(err) => {
                self.faults.record(&err);
                // Shapes were matched above
                let _ = output.copy_from(input);
                BlockStatus::Bypassed
            }
        }
    }

    fn try_process(&mut self, input: &AudioBlock, strength: f32, output: &mut AudioBlock) -> DspResult<f32> {
        match self.shape {
            None => self.prepare(input.frames(), input.channels())?,
            Some(shape) if shape != input.shape() => {
                return Err(DspError::ShapeChanged {
                    expected: shape,
                    got: input.shape(),
                });
            }
            Some(_) => {}
        }

        if !self.previous_valid {
            self.previous.clear();
            self.previous_valid = true;
        }

        for ch in 0..input.channels() {
            self.gate
                .gate(input.channel(ch), strength, self.work.channel_mut(ch))?;
        }

        let crossfader = self
            .crossfader
            .as_ref()
            .ok_or_else(|| DspError::InvalidConfig("crossfader not prepared".into()))?;
        crossfader.crossfade(&mut self.work, &self.previous)?;

        // Copy, not alias: the work buffer is normalized next
        self.previous
            .copy_from(&self.work)
            .map_err(|_| DspError::ShapeChanged {
                expected: self.previous.shape(),
                got: self.work.shape(),
            })?;

        let gain = self.normalizer.normalize(&mut self.work);
        output
            .copy_from(&self.work)
            .map_err(|_| DspError::ShapeChanged {
                expected: self.work.shape(),
                got: output.shape(),
            })?;

        Ok(gain)
    }

    /// Forget the previous block; the next block fades in from silence
    pub fn reset(&mut self) {
        self.previous_valid = false;
        self.previous.clear();
    }

    /// Previous-block state, if initialized
    pub fn previous(&self) -> Option<&AudioBlock> {
        self.previous_valid.then_some(&self.previous)
    }

    /// Shared failure counters
    pub fn faults(&self) -> Arc<TransformFaults> {
        Arc::clone(&self.faults)
    }

    /// Session shape, once prepared
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<G: ChannelGate> fmt::Debug for BlockPipeline<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPipeline")
            .field("gate", &self.gate.name())
            .field("config", &self.config)
            .field("shape", &self.shape)
            .field("faults", &self.faults.count())
            .finish()
    }
}
