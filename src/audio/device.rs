//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

/// Default capture device, or `CaptureUnavailable` when the host has none
pub fn default_input() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::CaptureUnavailable("no default input device".to_string()))
}

/// Default playback device
pub fn default_output() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::PlaybackUnavailable("no default output device".to_string()))
}

/// Summary of an audio device for display and the status API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_input_name.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo {
                name,
                is_input: true,
                is_output: false,
                is_default,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_output_name.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo {
                name,
                is_input: false,
                is_output: true,
                is_default,
            });
        }
    }

    devices
}
