//! Audio capture, metering, and clip assembly.

pub mod analyser;
pub mod capture;
pub mod clip;
pub mod level;
pub mod mic;
#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// Capture configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input device to capture from; `None` selects the system default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Input device information for enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub host: String,
}

/// List all available input devices
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_device_name = host.default_input_device().and_then(|d| d.name().ok());
    let host_id = host.id().name();

    let mut devices = Vec::new();
    for device in host.input_devices()? {
        if let Ok(name) = device.name() {
            let is_default = Some(name.clone()) == default_device_name;
            devices.push(DeviceInfo {
                name,
                is_default,
                host: host_id.to_string(),
            });
        }
    }

    Ok(devices)
}

/// Resolve an input device by name, falling back to the system default.
pub fn resolve_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(device_name) = name {
        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if device.name().ok().as_deref() == Some(device_name) {
                    log::info!("✓ resolved input device by name: {}", device_name);
                    return Ok(device);
                }
            }
        }
        log::warn!(
            "input device '{}' not found, falling back to default",
            device_name
        );
    }

    host.default_input_device()
        .context("no input device available")
}
