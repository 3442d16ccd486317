//! Audio block: a fixed frames x channels matrix of samples

use crate::{CoreError, CoreResult, Sample};

/// A block of audio frames.
///
/// Stored planar (channel-major) so each channel is one contiguous slice,
/// which is what the per-channel spectral stage wants. The transport speaks
/// interleaved frames; use [`AudioBlock::copy_from_interleaved`] and
/// [`AudioBlock::write_interleaved`] at that boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    frames: usize,
    channels: usize,
    samples: Vec<Sample>,
}

impl AudioBlock {
    /// Silent block of the given shape
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            frames,
            channels,
            samples: vec![0.0; frames * channels],
        }
    }

    /// Build a block from per-channel slices of equal length
    pub fn from_channels(channels: &[&[Sample]]) -> CoreResult<Self> {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut block = Self::new(frames, channels.len());

        for (ch, data) in channels.iter().enumerate() {
            if data.len() != frames {
                return Err(CoreError::ShapeMismatch {
                    expected_frames: frames,
                    expected_channels: channels.len(),
                    frames: data.len(),
                    channels: channels.len(),
                });
            }
            block.channel_mut(ch).copy_from_slice(data);
        }

        Ok(block)
    }

    /// Build a block from interleaved frames
    pub fn from_interleaved(data: &[Sample], channels: usize) -> CoreResult<Self> {
        if channels == 0 || data.len() % channels != 0 {
            return Err(CoreError::InterleavedLength {
                expected: data.len() - data.len() % channels.max(1),
                got: data.len(),
            });
        }
        let mut block = Self::new(data.len() / channels, channels);
        block.copy_from_interleaved(data)?;
        Ok(block)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// (frames, channels)
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.frames, self.channels)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn same_shape(&self, other: &AudioBlock) -> bool {
        self.shape() == other.shape()
    }

    /// Fail unless the block has exactly this shape
    pub fn check_shape(&self, frames: usize, channels: usize) -> CoreResult<()> {
        if self.shape() == (frames, channels) {
            Ok(())
        } else {
            Err(CoreError::ShapeMismatch {
                expected_frames: frames,
                expected_channels: channels,
                frames: self.frames,
                channels: self.channels,
            })
        }
    }

    /// Samples of one channel
    ///
    /// Panics if `ch >= self.channels()`.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * self.frames;
        &self.samples[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * self.frames;
        &mut self.samples[start..start + self.frames]
    }

    /// All samples, channel after channel
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Reshape, discarding contents. Allocates only when growing.
    pub fn reshape(&mut self, frames: usize, channels: usize) {
        self.frames = frames;
        self.channels = channels;
        self.samples.clear();
        self.samples.resize(frames * channels, 0.0);
    }

    /// Overwrite with silence
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Copy another block of the same shape into this one without allocating
    pub fn copy_from(&mut self, other: &AudioBlock) -> CoreResult<()> {
        other.check_shape(self.frames, self.channels)?;
        self.samples.copy_from_slice(&other.samples);
        Ok(())
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> Sample {
        self.samples.iter().fold(0.0, |peak: Sample, s| peak.max(s.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// True if any sample is NaN or infinite
    pub fn has_non_finite(&self) -> bool {
        self.samples.iter().any(|s| !s.is_finite())
    }

    /// Fill from interleaved frames (`frame0ch0, frame0ch1, ...`)
    pub fn copy_from_interleaved(&mut self, data: &[Sample]) -> CoreResult<()> {
        let expected = self.frames * self.channels;
        if data.len() != expected {
            return Err(CoreError::InterleavedLength {
                expected,
                got: data.len(),
            });
        }

        for (frame, chunk) in data.chunks_exact(self.channels).enumerate() {
            for (ch, &sample) in chunk.iter().enumerate() {
                self.samples[ch * self.frames + frame] = sample;
            }
        }

        Ok(())
    }

    /// Write out as interleaved frames
    pub fn write_interleaved(&self, out: &mut [Sample]) -> CoreResult<()> {
        let expected = self.frames * self.channels;
        if out.len() != expected {
            return Err(CoreError::InterleavedLength {
                expected,
                got: out.len(),
            });
        }

        for (frame, chunk) in out.chunks_exact_mut(self.channels).enumerate() {
            for (ch, sample) in chunk.iter_mut().enumerate() {
                *sample = self.samples[ch * self.frames + frame];
            }
        }

        Ok(())
    }
}
