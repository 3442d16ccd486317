//! Audio endpoint enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};

use crate::{AudioError, AudioResult};

/// Name fragments that identify a loopback / virtual-cable input
pub const DEFAULT_INPUT_PATTERNS: [&str; 2] = ["BlackHole", "Soundflower"];

/// Audio endpoint information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Position in the host's device enumeration
    pub index: usize,
    pub name: String,
    pub is_default_output: bool,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: Option<u32>,
}

impl EndpointInfo {
    #[inline]
    pub fn has_input(&self) -> bool {
        self.max_input_channels > 0
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Source of the endpoints a session can be opened on
pub trait EndpointDirectory: Send + Sync {
    /// Enumerate endpoints in a stable order
    fn endpoints(&self) -> AudioResult<Vec<EndpointInfo>>;
}

/// Pick the first endpoint with input channels whose name contains any pattern
pub fn resolve_input<'a, S: AsRef<str>>(
    endpoints: &'a [EndpointInfo],
    patterns: &[S],
) -> AudioResult<&'a EndpointInfo> {
    endpoints
        .iter()
        .filter(|e| e.has_input())
        .find(|e| patterns.iter().any(|p| e.name.contains(p.as_ref())))
        .ok_or_else(|| {
            let wanted: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
            AudioError::NoVirtualInput(wanted.join(", "))
        })
}

/// Look up the endpoint at `index`; it must have output channels
pub fn resolve_output(endpoints: &[EndpointInfo], index: usize) -> AudioResult<&EndpointInfo> {
    endpoints
        .iter()
        .find(|e| e.index == index && e.has_output())
        .ok_or(AudioError::OutputNotFound(index))
}

/// Endpoints a session can play to
pub fn output_endpoints(endpoints: &[EndpointInfo]) -> Vec<EndpointInfo> {
    endpoints.iter().filter(|e| e.has_output()).cloned().collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CPAL DIRECTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Get the audio host (platform default backend)
pub fn get_host() -> Host {
    cpal::default_host()
}

/// Name of the backend in use
pub fn host_name() -> String {
    format!("{:?}", get_host().id())
}

/// Endpoint directory backed by the platform's cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDirectory;

impl CpalDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl EndpointDirectory for CpalDirectory {
    fn endpoints(&self) -> AudioResult<Vec<EndpointInfo>> {
        let host = get_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let mut endpoints = Vec::new();

        for (index, device) in host
            .devices()
            .map_err(|e| AudioError::BackendError(e.to_string()))?
            .enumerate()
        {
            let Ok(name) = device.name() else {
                continue;
            };

            let is_default_output = default_name.as_deref() == Some(name.as_str());

            endpoints.push(EndpointInfo {
                index,
                is_default_output,
                max_input_channels: max_input_channels(&device),
                max_output_channels: max_output_channels(&device),
                default_sample_rate: default_sample_rate(&device),
                name,
            });
        }

        Ok(endpoints)
    }
}

/// Find a device by name, requiring input or output capability
pub(crate) fn find_device(name: &str, is_input: bool) -> AudioResult<Device> {
    let host = get_host();

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::BackendError(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name()
            && device_name == name
        {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn max_input_channels(device: &Device) -> u16 {
    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map(|c| c.collect())
        .unwrap_or_default();

    max_channels(&configs)
}

fn max_output_channels(device: &Device) -> u16 {
    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map(|c| c.collect())
        .unwrap_or_default();

    max_channels(&configs)
}

fn max_channels(configs: &[SupportedStreamConfigRange]) -> u16 {
    configs.iter().map(|c| c.channels()).max().unwrap_or(0)
}

fn default_sample_rate(device: &Device) -> Option<u32> {
    device
        .default_output_config()
        .or_else(|_| device.default_input_config())
        .ok()
        .map(|c| c.sample_rate().0)
}
