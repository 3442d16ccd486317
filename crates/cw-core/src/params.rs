//! Noise-reduction strength shared between the control and audio threads

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default strength (30 on the 0-100 slider)
pub const DEFAULT_STRENGTH: f32 = 0.3;

/// Lock-free noise-reduction strength in [0, 1].
///
/// Written by the control surface, read once per block by the audio
/// callback. Relaxed ordering: a value that is one block stale is fine.
#[derive(Debug)]
pub struct NoiseReduction {
    bits: AtomicU32,
}

impl NoiseReduction {
    pub fn new(value: f32) -> Self {
        let value = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            DEFAULT_STRENGTH
        };
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    /// Shared handle with the given initial value
    pub fn shared(value: f32) -> Arc<Self> {
        Arc::new(Self::new(value))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Store a new strength, clamped into [0, 1]. NaN/inf are ignored.
    #[inline]
    pub fn set(&self, value: f32) {
        if !value.is_finite() {
            log::warn!("Ignoring non-finite noise reduction strength");
            return;
        }
        self.bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Strength on the user-facing 0-100 scale
    #[inline]
    pub fn percent(&self) -> f32 {
        self.get() * 100.0
    }

    #[inline]
    pub fn set_percent(&self, percent: f32) {
        self.set(percent / 100.0);
    }
}

impl Default for NoiseReduction {
    fn default() -> Self {
        Self::new(DEFAULT_STRENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_strength() {
        let strength = NoiseReduction::default();
        assert_relative_eq!(strength.get(), 0.3);
        assert_relative_eq!(strength.percent(), 30.0, epsilon = 1e-4);
    }

    #[test]
    fn test_clamping() {
        let strength = NoiseReduction::new(2.0);
        assert_eq!(strength.get(), 1.0);

        strength.set(-0.5);
        assert_eq!(strength.get(), 0.0);

        strength.set_percent(75.0);
        assert_relative_eq!(strength.get(), 0.75);
    }

    #[test]
    fn test_non_finite_ignored() {
        let strength = NoiseReduction::new(0.4);
        strength.set(f32::NAN);
        assert_relative_eq!(strength.get(), 0.4);
        strength.set(f32::INFINITY);
        assert_relative_eq!(strength.get(), 0.4);

        assert_relative_eq!(NoiseReduction::new(f32::NAN).get(), DEFAULT_STRENGTH);
    }

    #[test]
    fn test_shared_across_threads() {
        let strength = NoiseReduction::shared(0.1);
        let writer = Arc::clone(&strength);

        std::thread::spawn(move || writer.set(0.9))
            .join()
            .unwrap();

        assert_relative_eq!(strength.get(), 0.9);
    }
}
