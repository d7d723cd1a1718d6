//! Output device discovery
//!
//! A desk needs a stereo-capable f32 output at its own sample rate. Devices
//! are listed across every cpal host so one can be named in the config, and
//! a configured [`DeviceId`] is resolved back to a cpal device at startup.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId, SampleFormat};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// An output device as seen at enumeration time
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub is_default: bool,
    /// Inclusive f32 sample-rate ranges with at least two channels
    pub stereo_rate_ranges: Vec<(u32, u32)>,
}

impl AudioDevice {
    /// Can this device carry a desk running at `sample_rate`
    pub fn supports_rate(&self, sample_rate: u32) -> bool {
        self.stereo_rate_ranges
            .iter()
            .any(|&(min, max)| (min..=max).contains(&sample_rate))
    }
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}

fn open_hosts() -> impl Iterator<Item = (HostId, Host)> {
    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| match cpal::host_from_id(host_id) {
            Ok(host) => Some((host_id, host)),
            Err(e) => {
                log::debug!("Host {} unavailable: {}", host_id.name(), e);
                None
            }
        })
}

fn describe(device: &Device, host: &str, default_name: Option<&str>) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    let stereo_rate_ranges: Vec<(u32, u32)> = device
        .supported_output_configs()
        .ok()?
        .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
        .map(|c| (c.min_sample_rate().0, c.max_sample_rate().0))
        .collect();
    if stereo_rate_ranges.is_empty() {
        return None;
    }

    Some(AudioDevice {
        id: DeviceId::with_host(&name, host),
        is_default: default_name == Some(name.as_str()),
        name,
        host: host.to_string(),
        stereo_rate_ranges,
    })
}

/// Every usable output device, default devices first
pub fn get_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut devices = Vec::new();

    for (host_id, host) in open_hosts() {
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let outputs = match host.output_devices() {
            Ok(outputs) => outputs,
            Err(e) => {
                log::debug!("Could not list {} devices: {}", host_id.name(), e);
                continue;
            }
        };
        devices.extend(
            outputs.filter_map(|d| describe(&d, host_id.name(), default_name.as_deref())),
        );
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }
    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(devices)
}

/// Description of the device the desk opens when none is configured
pub fn get_default_device() -> AudioResult<AudioDevice> {
    let device = get_cpal_default_device()?;
    let host = cpal::default_host().id().name();
    let name = device.name().ok();
    describe(&device, host, name.as_deref()).ok_or_else(|| {
        AudioError::UnsupportedConfig("default device has no stereo f32 output".to_string())
    })
}

/// Resolve a configured device, searching the named host first
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<Device> {
    let named = |d: &Device| d.name().map(|n| n == id.name).unwrap_or(false);

    let mut hosts: Vec<(HostId, Host)> = open_hosts().collect();
    if let Some(wanted) = id.host.as_deref() {
        hosts.sort_by_key(|(host_id, _)| host_id.name() != wanted);
    }

    hosts
        .iter()
        .filter_map(|(_, host)| host.output_devices().ok())
        .find_map(|mut outputs| outputs.find(|d| named(d)))
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

/// The default output device of the default host
pub fn get_cpal_default_device() -> AudioResult<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDefaultDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_ranges() {
        let device = AudioDevice {
            id: DeviceId::with_host("Speakers", "ALSA"),
            name: "Speakers".to_string(),
            host: "ALSA".to_string(),
            is_default: true,
            stereo_rate_ranges: vec![(44_100, 48_000)],
        };
        assert!(device.supports_rate(44_100));
        assert!(device.supports_rate(48_000));
        assert!(!device.supports_rate(96_000));
        assert_eq!(device.to_string(), "[ALSA] Speakers (default)");
    }

    #[test]
    fn test_device_enumeration() {
        // Machines without audio hardware report NoDevices
        match get_output_devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.stereo_rate_ranges.is_empty());
                }
            }
            Err(AudioError::NoDevices) => {}
            Err(e) => println!("Error enumerating devices: {}", e),
        }
    }

    #[test]
    fn test_unknown_device_not_found() {
        let id = DeviceId::new("stemdesk-test-no-such-device");
        assert!(matches!(
            find_device_by_id(&id),
            Err(AudioError::DeviceNotFound(_))
        ));
    }
}
