//! cw-audio: Audio I/O and session control using cpal
//!
//! Captures from a virtual-cable input (BlackHole, Soundflower), runs each
//! block through the `cw-dsp` pipeline and plays the result on the selected
//! output device.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌─────────────┐
//! │ StreamController │────▶│ Transport     │────▶│ cpal Device │
//! │                  │     │               │     │             │
//! │ - strength       │     │ - assembler   │     │ - input     │
//! │ - output select  │     │ - pipeline cb │     │ - output    │
//! │ - state machine  │     │ - ring        │     │             │
//! └──────────────────┘     └───────────────┘     └─────────────┘
//! ```

mod controller;
mod device;
mod error;
mod stream;

pub use controller::*;
pub use device::*;
pub use error::*;
pub use stream::*;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cw_core::{DEFAULT_STRENGTH, SampleRate};
use cw_dsp::PipelineConfig;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stream sample rate in Hz
    pub sample_rate: u32,
    /// Frames per processed block
    pub block_size: usize,
    pub pipeline: PipelineConfig,
    /// Initial noise-reduction strength in [0, 1]
    pub default_strength: f32,
    /// Name fragments identifying the virtual-cable input
    pub input_name_patterns: Vec<String>,
    /// Upper bound on how long `stop()` waits for the stream thread to notice
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000.as_u32(),
            block_size: 2048,
            pipeline: PipelineConfig::default(),
            default_strength: DEFAULT_STRENGTH,
            input_name_patterns: DEFAULT_INPUT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            poll_interval_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> AudioResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AudioError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> AudioResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| AudioError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> AudioResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| AudioError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> AudioResult<()> {
        SampleRate::from_u32(self.sample_rate)
            .map_err(|_| AudioError::UnsupportedSampleRate(self.sample_rate))?;

        if self.block_size == 0 {
            return Err(AudioError::InvalidConfig("block_size must be positive".into()));
        }

        self.pipeline
            .validate()
            .map_err(|e| AudioError::InvalidConfig(e.to_string()))?;

        if !(0.0..=1.0).contains(&self.default_strength) {
            return Err(AudioError::InvalidConfig(format!(
                "default_strength must be in [0, 1], got {}",
                self.default_strength
            )));
        }

        if self.input_name_patterns.is_empty() {
            return Err(AudioError::InvalidConfig(
                "at least one input name pattern is required".into(),
            ));
        }
        // An empty fragment matches every device name
        if self.input_name_patterns.iter().any(|p| p.is_empty()) {
            return Err(AudioError::InvalidConfig("input name patterns must not be empty".into()));
        }

        if self.poll_interval_ms == 0 {
            return Err(AudioError::InvalidConfig("poll_interval_ms must be positive".into()));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.input_name_patterns, vec!["BlackHole", "Soundflower"]);
        approx::assert_relative_eq!(config.default_strength, 0.3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{ "block_size": 1024, "pipeline": { "headroom": 0.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.sample_rate, 48000);
        approx::assert_relative_eq!(config.pipeline.headroom, 0.5);
        approx::assert_relative_eq!(config.pipeline.overlap, 0.5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            r#"{ "block_size": 0 }"#,
            r#"{ "default_strength": 1.5 }"#,
            r#"{ "pipeline": { "overlap": 1.0 } }"#,
            r#"{ "input_name_patterns": [] }"#,
            r#"{ "input_name_patterns": [""] }"#,
            r#"{ "input_name_patterns": ["", "BlackHole"] }"#,
            r#"{ "poll_interval_ms": 0 }"#,
            r#"{ "block_size": "big" }"#,
        ];
        for json in bad {
            assert!(
                matches!(SessionConfig::from_json_str(json), Err(AudioError::InvalidConfig(_))),
                "{json} should be rejected"
            );
        }

        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "sample_rate": 12345 }"#),
            Err(AudioError::UnsupportedSampleRate(12345))
        ));
    }

    #[test]
    fn test_json_file_round_trip() {
        let config = SessionConfig {
            block_size: 512,
            default_strength: 0.75,
            ..Default::default()
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = SessionConfig::from_json_file("/nonexistent/clearwave.json").unwrap_err();
        assert!(matches!(err, AudioError::InvalidConfig(_)));
        assert!(err.to_string().contains("clearwave.json"));
    }

    #[test]
    fn test_poll_interval() {
        let config = SessionConfig {
            poll_interval_ms: 25,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
    }
}
