//! Output device discovery

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use crate::error::{AudioError, AudioResult};

/// Names of every output device on the default host.
pub fn list_output_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Name of the default output device, if any.
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

pub(crate) fn get_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();

    match name {
        None => host.default_output_device().ok_or(AudioError::NoDevice),
        Some(wanted) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| AudioError::Stream(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string()))
        }
    }
}
