//! Audio stream management
//!
//! A [`Transport`] turns a pair of endpoints into a running duplex stream that
//! hands the session callback one fixed-size [`AudioBlock`] at a time.
//! [`CpalTransport`] does this with two cpal streams joined by an `rtrb` ring:
//!
//! ```text
//! input device ──▶ BlockAssembler ──▶ callback ──▶ ring ──▶ output device
//!   (frames)         (blockSize)      (pipeline)   (SPSC)     (drain / zero-fill)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfigRange,
};
use rtrb::{Consumer, Producer, RingBuffer};

use cw_core::{AudioBlock, Sample};

use crate::device::find_device;
use crate::{AudioError, AudioResult, EndpointInfo};

/// Per-block session callback: `(input, output)`, both `blockSize x channels`
pub type BlockCallback = Box<dyn FnMut(&AudioBlock, &mut AudioBlock) + Send + 'static>;

/// Called from the backend when the stream dies
pub type FaultCallback = Arc<dyn Fn(AudioError) + Send + Sync + 'static>;

/// Blocks of headroom in the input → output ring
const RING_BLOCKS: usize = 4;

/// Everything a transport needs to open one session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub input: EndpointInfo,
    pub output: EndpointInfo,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl StreamParams {
    /// Time budget of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(cw_core::block_deadline_ms(self.block_size, self.sample_rate) / 1000.0)
    }
}

/// A duplex stream opened by a [`Transport`].
///
/// Not required to be `Send`: the controller keeps it on the thread that
/// opened it.
pub trait ActiveStream {
    /// Start delivering blocks
    fn play(&mut self) -> AudioResult<()>;

    /// Stop delivering blocks
    fn pause(&mut self) -> AudioResult<()>;

    /// Output callbacks that found the ring short
    fn underruns(&self) -> u64 {
        0
    }
}

/// Opens duplex block streams
pub trait Transport: Send + Sync {
    fn open(
        &self,
        params: &StreamParams,
        callback: BlockCallback,
        on_fault: FaultCallback,
    ) -> AudioResult<Box<dyn ActiveStream>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects interleaved frames of arbitrary callback sizes into exact blocks.
///
/// All buffers are allocated in [`BlockAssembler::new`]; `push` never allocates.
pub struct BlockAssembler {
    block_size: usize,
    channels: usize,
    /// Samples per incoming frame (device channels, >= `channels`)
    stride: usize,
    /// Frames collected so far, interleaved `channels` wide
    pending: Vec<Sample>,
    filled: usize,
    input: AudioBlock,
    output: AudioBlock,
    interleaved_out: Vec<Sample>,
}

impl BlockAssembler {
    pub fn new(block_size: usize, channels: usize, stride: usize) -> Self {
        let stride = stride.max(channels);
        Self {
            block_size,
            channels,
            stride,
            pending: vec![0.0; block_size * channels],
            filled: 0,
            input: AudioBlock::new(block_size, channels),
            output: AudioBlock::new(block_size, channels),
            interleaved_out: vec![0.0; block_size * channels],
        }
    }

    /// Frames waiting for the next block
    pub fn pending_frames(&self) -> usize {
        self.filled
    }

    /// Feed interleaved frames; every completed block goes through `process`
    /// and its interleaved result is handed to `emit`. Returns blocks completed.
    pub fn push<P, E>(&mut self, data: &[Sample], process: &mut P, mut emit: E) -> usize
    where
        P: FnMut(&AudioBlock, &mut AudioBlock),
        E: FnMut(&[Sample]),
    {
        let mut completed = 0;

        for frame in data.chunks_exact(self.stride) {
            let start = self.filled * self.channels;
            self.pending[start..start + self.channels].copy_from_slice(&frame[..self.channels]);
            self.filled += 1;

            if self.filled == self.block_size {
                self.flush(process, &mut emit);
                self.filled = 0;
                completed += 1;
            }
        }

        completed
    }

    fn flush<P, E>(&mut self, process: &mut P, emit: &mut E)
    where
        P: FnMut(&AudioBlock, &mut AudioBlock),
        E: FnMut(&[Sample]),
    {
        if self.input.copy_from_interleaved(&self.pending).is_err() {
            emit(&self.pending);
            return;
        }

        process(&self.input, &mut self.output);

        if self.output.write_interleaved(&mut self.interleaved_out).is_ok() {
            emit(&self.interleaved_out);
        } else {
            // Callback reshaped the block; play the raw input
            emit(&self.pending);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RING TRANSFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Write one interleaved block into the ring, all or nothing.
///
/// Returns `false` and leaves the ring untouched when the block does not fit,
/// so a reader never sees part of a block.
pub(crate) fn push_block(producer: &mut Producer<Sample>, block: &[Sample]) -> bool {
    if producer.slots() < block.len() {
        return false;
    }
    match producer.write_chunk_uninit(block.len()) {
        Ok(chunk) => {
            chunk.fill_from_iter(block.iter().copied());
            true
        }
        Err(_) => false,
    }
}

/// Fill an interleaved device buffer from the ring in whole frames.
///
/// Each `stride`-wide frame takes `channels` samples from the ring; extra
/// device channels are zeroed. Frames the ring cannot cover are zeroed whole
/// and a trailing partial frame in the ring stays there. Returns frames read.
pub(crate) fn drain_frames(
    consumer: &mut Consumer<Sample>,
    data: &mut [Sample],
    channels: usize,
    stride: usize,
) -> usize {
    let stride = stride.max(channels);
    let wanted = data.len() / stride;
    let available = (consumer.slots() / channels).min(wanted);
    let mut read = 0;

    if let Ok(chunk) = consumer.read_chunk(available * channels) {
        {
            let (first, second) = chunk.as_slices();
            let mut source = first.iter().chain(second).copied();
            for frame in data.chunks_mut(stride).take(available) {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = if ch < channels {
                        source.next().unwrap_or(0.0)
                    } else {
                        0.0
                    };
                }
            }
        }
        chunk.commit_all();
        read = available;
    }

    for frame in data.chunks_mut(stride).skip(read) {
        frame.fill(0.0);
    }

    read
}

// ═══════════════════════════════════════════════════════════════════════════════
// CPAL TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters shared with the output callback
#[derive(Debug, Default)]
struct RingCounters {
    underruns: AtomicU64,
    overflows: AtomicU64,
}

/// Duplex transport on the platform's cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalTransport;

impl CpalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for CpalTransport {
    fn open(
        &self,
        params: &StreamParams,
        callback: BlockCallback,
        on_fault: FaultCallback,
    ) -> AudioResult<Box<dyn ActiveStream>> {
        let input_device = find_device(&params.input.name, true)?;
        let output_device = find_device(&params.output.name, false)?;

        let input_config = get_stream_config(&input_device, params, true)?;
        let output_config = get_stream_config(&output_device, params, false)?;

        log::debug!(
            "Opening streams: input {:?}, output {:?}",
            input_config,
            output_config
        );

        let channels = params.channels as usize;
        let (producer, consumer) = RingBuffer::<Sample>::new(params.block_size * channels * RING_BLOCKS);
        let counters = Arc::new(RingCounters::default());

        let output_stream = build_output_stream(
            &output_device,
            &output_config,
            channels,
            consumer,
            Arc::clone(&counters),
            Arc::clone(&on_fault),
        )?;

        let input_stream = build_input_stream(
            &input_device,
            &input_config,
            params,
            callback,
            producer,
            Arc::clone(&counters),
            on_fault,
        )?;

        Ok(Box::new(CpalStream {
            input: input_stream,
            output: output_stream,
            counters,
        }))
    }
}

struct CpalStream {
    input: Stream,
    output: Stream,
    counters: Arc<RingCounters>,
}

impl ActiveStream for CpalStream {
    fn play(&mut self) -> AudioResult<()> {
        self.output
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.input
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        Ok(())
    }

    fn pause(&mut self) -> AudioResult<()> {
        self.input
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.output
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let overflows = self.counters.overflows.load(Ordering::Relaxed);
        if overflows > 0 {
            log::debug!("Output ring overflowed {} times", overflows);
        }
        Ok(())
    }

    fn underruns(&self) -> u64 {
        self.counters.underruns.load(Ordering::Relaxed)
    }
}

fn get_stream_config(
    device: &Device,
    params: &StreamParams,
    is_input: bool,
) -> AudioResult<StreamConfig> {
    let sample_rate = cpal::SampleRate(params.sample_rate);
    let direction = if is_input { "input" } else { "output" };

    let configs: Vec<SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect()
    } else {
        device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect()
    };

    let usable = |c: &&SupportedStreamConfigRange| {
        c.channels() >= params.channels
            && c.min_sample_rate() <= sample_rate
            && c.max_sample_rate() >= sample_rate
            && c.sample_format() == SampleFormat::F32
    };

    // Exact channel count first, then any wider layout
    let supported = configs
        .iter()
        .filter(usable)
        .find(|c| c.channels() == params.channels)
        .or_else(|| configs.iter().find(usable))
        .ok_or_else(|| {
            AudioError::ConfigError(format!(
                "No matching {} config for {} channels @ {}Hz (f32)",
                direction, params.channels, params.sample_rate
            ))
        })?;

    let block = params.block_size as u32;
    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&block) => {
            CpalBufferSize::Fixed(block)
        }
        _ => {
            log::warn!(
                "{} device does not accept a fixed {}-frame buffer, using host default",
                direction,
                block
            );
            CpalBufferSize::Default
        }
    };

    Ok(StreamConfig {
        channels: supported.channels(),
        sample_rate,
        buffer_size,
    })
}

fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    params: &StreamParams,
    mut callback: BlockCallback,
    mut producer: Producer<Sample>,
    counters: Arc<RingCounters>,
    on_fault: FaultCallback,
) -> AudioResult<Stream> {
    let mut assembler = BlockAssembler::new(
        params.block_size,
        params.channels as usize,
        config.channels as usize,
    );

    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data, &mut callback, |block| {
                    if !push_block(&mut producer, block) {
                        counters.overflows.fetch_add(1, Ordering::Relaxed);
                    }
                });
            },
            move |err| {
                on_fault(AudioError::StreamError(format!("input: {}", err)));
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

fn build_output_stream(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    mut consumer: Consumer<Sample>,
    counters: Arc<RingCounters>,
    on_fault: FaultCallback,
) -> AudioResult<Stream> {
    let stride = (config.channels as usize).max(channels);
    // Underruns only count once the first block has arrived
    let mut primed = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let wanted = data.len() / stride;
                let read = drain_frames(&mut consumer, data, channels, stride);

                if read > 0 {
                    primed = true;
                }
                if primed && read < wanted {
                    counters.underruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                on_fault(AudioError::StreamError(format!("output: {}", err)));
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize, start: usize) -> Vec<Sample> {
        (0..frames * channels)
            .map(|i| (start * channels + i) as Sample)
            .collect()
    }

    #[test]
    fn test_assembler_waits_for_full_block() {
        let mut assembler = BlockAssembler::new(8, 2, 2);
        let mut calls = 0;
        let mut process = |input: &AudioBlock, output: &mut AudioBlock| {
            calls += 1;
            output.copy_from(input).unwrap();
        };
        let mut emitted = Vec::new();

        let done = assembler.push(&ramp(5, 2, 0), &mut process, |b| emitted.extend_from_slice(b));
        assert_eq!(done, 0);
        assert_eq!(assembler.pending_frames(), 5);
        assert!(emitted.is_empty());

        let done = assembler.push(&ramp(5, 2, 5), &mut process, |b| emitted.extend_from_slice(b));
        assert_eq!(done, 1);
        assert_eq!(assembler.pending_frames(), 2);
        assert_eq!(calls, 1);

        // Identity callback round-trips the first 8 frames in order
        assert_eq!(emitted, ramp(8, 2, 0));
    }

    #[test]
    fn test_assembler_splits_large_callbacks() {
        let mut assembler = BlockAssembler::new(4, 1, 1);
        let mut frames_seen = Vec::new();
        let mut process = |input: &AudioBlock, output: &mut AudioBlock| {
            frames_seen.push(input.frames());
            output.copy_from(input).unwrap();
        };

        let done = assembler.push(&ramp(10, 1, 0), &mut process, |_| {});
        assert_eq!(done, 2);
        assert_eq!(frames_seen, vec![4, 4]);
        assert_eq!(assembler.pending_frames(), 2);
    }

    #[test]
    fn test_assembler_drops_extra_device_channels() {
        // 4-channel device feeding a stereo session
        let mut assembler = BlockAssembler::new(2, 2, 4);
        let data = [1.0, 2.0, 90.0, 91.0, 3.0, 4.0, 92.0, 93.0];
        let mut seen = None;
        let mut process = |input: &AudioBlock, output: &mut AudioBlock| {
            seen = Some((input.channel(0).to_vec(), input.channel(1).to_vec()));
            output.copy_from(input).unwrap();
        };
        let mut emitted = Vec::new();

        assembler.push(&data, &mut process, |b| emitted.extend_from_slice(b));

        assert_eq!(seen, Some((vec![1.0, 3.0], vec![2.0, 4.0])));
        assert_eq!(emitted, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_assembler_passes_processed_output() {
        let mut assembler = BlockAssembler::new(3, 1, 1);
        let mut process = |input: &AudioBlock, output: &mut AudioBlock| {
            for (o, i) in output.samples_mut().iter_mut().zip(input.samples()) {
                *o = i * -1.0;
            }
        };
        let mut emitted = Vec::new();

        assembler.push(&[1.0, 2.0, 3.0], &mut process, |b| emitted.extend_from_slice(b));
        assert_eq!(emitted, vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_assembler_reshaped_output_plays_input() {
        let mut assembler = BlockAssembler::new(2, 1, 1);
        let mut process = |_: &AudioBlock, output: &mut AudioBlock| {
            output.reshape(5, 1);
        };
        let mut emitted = Vec::new();

        assembler.push(&[0.25, 0.5], &mut process, |b| emitted.extend_from_slice(b));
        assert_eq!(emitted, vec![0.25, 0.5]);
    }

    fn ring(frames: usize, channels: usize) -> (Producer<Sample>, Consumer<Sample>) {
        RingBuffer::new(frames * channels)
    }

    #[test]
    fn test_full_ring_drops_whole_block() {
        let (mut producer, mut consumer) = ring(4, 2);

        // Capacity minus one frame
        assert!(push_block(&mut producer, &ramp(3, 2, 0)));
        assert_eq!(producer.slots(), 2);

        // Two frames do not fit; nothing of them is written
        assert!(!push_block(&mut producer, &ramp(2, 2, 3)));
        assert_eq!(producer.slots(), 2);

        let mut out = vec![-1.0; 4 * 2];
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 3);
        assert_eq!(&out[..6], ramp(3, 2, 0).as_slice());
        assert_eq!(&out[6..], &[0.0, 0.0]);
    }

    #[test]
    fn test_channel_order_survives_overflow() {
        let (mut producer, mut consumer) = ring(4, 2);
        let mut out = vec![0.0; 2 * 2];

        assert!(push_block(&mut producer, &ramp(3, 2, 0)));
        assert!(!push_block(&mut producer, &ramp(2, 2, 3)));

        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 2);
        assert_eq!(out, ramp(2, 2, 0));

        assert!(push_block(&mut producer, &ramp(2, 2, 5)));
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 2);
        assert_eq!(out, vec![4.0, 5.0, 10.0, 11.0]);
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 1);
        assert_eq!(out, vec![12.0, 13.0, 0.0, 0.0]);
    }

    #[test]
    fn test_underrun_zero_fills_whole_frames() {
        let (mut producer, mut consumer) = ring(4, 2);
        // One and a half frames in the ring
        assert!(push_block(&mut producer, &[1.0, 2.0, 3.0]));

        let mut out = vec![-1.0; 3 * 2];
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 1);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);

        // The half frame waits for its partner instead of landing on the left channel
        assert_eq!(consumer.slots(), 1);
        assert!(push_block(&mut producer, &[4.0]));
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 1);
        assert_eq!(&out[..2], &[3.0, 4.0]);
    }

    #[test]
    fn test_drain_zeroes_extra_device_channels() {
        let (mut producer, mut consumer) = ring(4, 2);
        assert!(push_block(&mut producer, &ramp(2, 2, 1)));

        // Stereo session on a 3-channel device
        let mut out = vec![-1.0; 3 * 3];
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 3), 2);
        assert_eq!(out, vec![2.0, 3.0, 0.0, 4.0, 5.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_ring_is_silence() {
        let (_producer, mut consumer) = ring(4, 2);
        let mut out = vec![0.7; 4];
        assert_eq!(drain_frames(&mut consumer, &mut out, 2, 2), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_block_duration() {
        let params = StreamParams {
            input: EndpointInfo {
                index: 0,
                name: "in".into(),
                is_default_output: false,
                max_input_channels: 2,
                max_output_channels: 0,
                default_sample_rate: None,
            },
            output: EndpointInfo {
                index: 1,
                name: "out".into(),
                is_default_output: true,
                max_input_channels: 0,
                max_output_channels: 2,
                default_sample_rate: None,
            },
            channels: 2,
            sample_rate: 48000,
            block_size: 2048,
        };
        let ms = params.block_duration().as_secs_f64() * 1000.0;
        assert!((ms - 42.666).abs() < 0.01);
    }
}
