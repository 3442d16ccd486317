//! End-to-end block pipeline scenarios
//!
//! Runs whole blocks through the real spectral gate, crossfade and
//! normalizer and checks the observable output.

use std::f32::consts::PI;

use approx::assert_abs_diff_eq;
use cw_core::AudioBlock;
use cw_dsp::{BlockPipeline, BlockStatus, FaultKind, PipelineConfig};
use realfft::RealFftPlanner;

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK_SIZE: usize = 2048;

fn sine_block(freq: f32, amplitude: f32, channels: usize) -> AudioBlock {
    let mut block = AudioBlock::new(BLOCK_SIZE, channels);
    for ch in 0..channels {
        for (i, s) in block.channel_mut(ch).iter_mut().enumerate() {
            *s = amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE).sin();
        }
    }
    block
}

fn noise_block(seed: u64, amplitude: f32) -> AudioBlock {
    let mut state = seed;
    let mut block = AudioBlock::new(BLOCK_SIZE, 1);
    for s in block.channel_mut(0) {
        // Simple LCG for reproducible noise
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *s = ((state >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0) * amplitude;
    }
    block
}

fn pipeline() -> BlockPipeline {
    BlockPipeline::new(PipelineConfig::default()).unwrap()
}

fn peak_bin(samples: &[f32]) -> usize {
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut input = samples.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum).unwrap();

    spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
        .map(|(i, _)| i)
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_silence_stays_silent() {
    let mut pipeline = pipeline();
    let input = AudioBlock::new(BLOCK_SIZE, 1);
    let mut output = AudioBlock::new(BLOCK_SIZE, 1);

    let status = pipeline.process(&input, 0.3, &mut output);

    assert_eq!(status, BlockStatus::Processed { gain: 1.0 });
    assert_eq!(output.frames(), BLOCK_SIZE);
    assert!(output.is_silent());
}

#[test]
fn test_full_scale_sine_normalized() {
    let mut pipeline = pipeline();
    let input = sine_block(1000.0, 1.0, 1);
    let mut output = AudioBlock::new(BLOCK_SIZE, 1);

    let status = pipeline.process(&input, 0.0, &mut output);

    assert!(matches!(status, BlockStatus::Processed { .. }));
    assert_eq!(output.shape(), input.shape());
    assert!(output.peak() <= 0.9 + 1e-5, "peak {}", output.peak());
    assert!(output.peak() > 0.85);

    // 1 kHz sits between bins 42 and 43 at 2048 / 48 kHz
    let bin = peak_bin(output.channel(0));
    assert!((42..=43).contains(&bin), "peak at bin {}", bin);
}

#[test]
fn test_constant_blocks_join_without_step() {
    let mut pipeline = pipeline();
    let mut input = AudioBlock::new(BLOCK_SIZE, 1);
    input.samples_mut().fill(0.5);

    let mut first = AudioBlock::new(BLOCK_SIZE, 1);
    let mut second = AudioBlock::new(BLOCK_SIZE, 1);
    pipeline.process(&input, 0.3, &mut first);
    pipeline.process(&input, 0.3, &mut second);

    let last = first.channel(0)[BLOCK_SIZE - 1];
    let next = second.channel(0)[0];
    assert!((last - next).abs() < 1e-3, "step {} -> {}", last, next);

    // And no step inside the second block either
    let max_step = second
        .channel(0)
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(max_step < 1e-3, "max step {}", max_step);
}

#[test]
fn test_first_block_fade_in_shape() {
    let mut pipeline = pipeline();
    let mut input = AudioBlock::new(BLOCK_SIZE, 2);
    input.samples_mut().fill(0.25);
    let mut output = AudioBlock::new(BLOCK_SIZE, 2);

    pipeline.process(&input, 0.0, &mut output);

    for ch in 0..2 {
        let samples = output.channel(ch);
        assert_abs_diff_eq!(samples[0], 0.0, epsilon = 1e-6);
        // Monotonic ramp over the fade region
        assert!(samples[..1024].windows(2).all(|w| w[1] >= w[0] - 1e-6));
        assert_abs_diff_eq!(samples[1500], 0.9, epsilon = 1e-3);
    }
}

#[test]
fn test_channels_processed_independently() {
    let mut pipeline = pipeline();
    let mut input = sine_block(750.0, 0.5, 2);
    input.channel_mut(1).fill(0.0);
    let mut output = AudioBlock::new(BLOCK_SIZE, 2);

    pipeline.process(&input, 0.3, &mut output);

    assert!(output.channel(1).iter().all(|&s| s == 0.0));
    assert!(output.channel(0).iter().any(|&s| s != 0.0));
}

#[test]
fn test_strength_reduces_noise_energy() {
    let tone = sine_block(1500.0, 0.5, 1);
    let noise = noise_block(7, 0.05);
    let mut input = tone.clone();
    for (s, n) in input.samples_mut().iter_mut().zip(noise.samples()) {
        *s += n;
    }

    // Energy left after removing the best-fitting copy of the tone, relative to the tone
    let noise_to_tone = |strength: f32| {
        let mut pipeline = pipeline();
        let mut output = AudioBlock::new(BLOCK_SIZE, 1);
        // Second block, so the crossfade no longer shapes the head
        pipeline.process(&input, strength, &mut output);
        pipeline.process(&input, strength, &mut output);

        let out = &output.channel(0)[1024..];
        let reference = &tone.channel(0)[1024..];
        let dot: f32 = out.iter().zip(reference).map(|(o, t)| o * t).sum();
        let energy: f32 = reference.iter().map(|t| t * t).sum();
        let scale = dot / energy;
        let residual: f32 = out
            .iter()
            .zip(reference)
            .map(|(o, t)| (o - t * scale).powi(2))
            .sum();
        residual / (scale * scale * energy)
    };

    assert!(noise_to_tone(1.0) < noise_to_tone(0.0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_failed_block_does_not_corrupt_state() {
    let blocks = [noise_block(1, 0.3), noise_block(2, 0.3)];
    let mut bad = noise_block(3, 0.3);
    bad.channel_mut(0)[100] = f32::NAN;

    let mut with_failure = pipeline();
    let mut reference = pipeline();
    let faults = with_failure.faults();

    let mut out_a = AudioBlock::new(BLOCK_SIZE, 1);
    let mut out_b = AudioBlock::new(BLOCK_SIZE, 1);

    with_failure.process(&blocks[0], 0.3, &mut out_a);
    reference.process(&blocks[0], 0.3, &mut out_b);
    assert_eq!(out_a, out_b);

    // Block k fails: raw input comes out, bit for bit
    let status = with_failure.process(&bad, 0.3, &mut out_a);
    assert_eq!(status, BlockStatus::Bypassed);
    for (o, i) in out_a.samples().iter().zip(bad.samples()) {
        assert_eq!(o.to_bits(), i.to_bits());
    }
    assert_eq!(faults.count(), 1);
    assert_eq!(faults.last_kind(), FaultKind::NonFinite);

    // Block k+1 behaves as if block k never happened
    with_failure.process(&blocks[1], 0.3, &mut out_a);
    reference.process(&blocks[1], 0.3, &mut out_b);
    assert_eq!(out_a, out_b);
}

#[test]
fn test_failure_on_first_block() {
    let mut pipeline = pipeline();
    let mut bad = AudioBlock::new(BLOCK_SIZE, 1);
    bad.channel_mut(0)[0] = f32::INFINITY;
    let mut output = AudioBlock::new(BLOCK_SIZE, 1);

    assert_eq!(pipeline.process(&bad, 0.3, &mut output), BlockStatus::Bypassed);
    assert_eq!(output.channel(0)[0], f32::INFINITY);

    // The next good block still fades in from silence
    let good = sine_block(440.0, 0.5, 1);
    pipeline.process(&good, 0.3, &mut output);
    assert_abs_diff_eq!(output.channel(0)[0], 0.0, epsilon = 1e-6);
}
