//! Audio device enumeration and ranking
//!
//! Devices are addressed by a "host:name" id. Ranking is a pure function of
//! the enumerated device table so the failover order is testable without
//! hardware: the requested device first, then same-named devices on
//! alternate host backends in empirical reliability order, then the OS
//! default input.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// One enumerated audio endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier, "host:name"
    pub id: String,

    /// Device display name
    pub name: String,

    pub max_input_channels: u16,
    pub max_output_channels: u16,

    /// Host backend name (WASAPI, ALSA, CoreAudio, ...)
    pub host: String,
}

pub fn device_id(host: &str, name: &str) -> String {
    format!("{host}:{name}")
}

/// Enumerate every device on every available host backend. Per-host
/// failures are logged and skipped; enumeration itself never fails hard.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut out = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::warn!("Skipping host {}: {}", host_id.name(), e);
                continue;
            }
        };

        let devices = match host.devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("Device enumeration failed on {}: {}", host_id.name(), e);
                continue;
            }
        };

        for device in devices {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let max_in = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            let max_out = device
                .supported_output_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);

            out.push(DeviceInfo {
                id: device_id(host_id.name(), &name),
                name,
                max_input_channels: max_in,
                max_output_channels: max_out,
                host: host_id.name().to_string(),
            });
        }
    }

    out
}

/// Id of the OS default input device on the default host, if any.
pub fn default_input_id() -> Option<String> {
    let host = cpal::default_host();
    let device = host.default_input_device()?;
    let name = device.name().ok()?;
    Some(device_id(host.id().name(), &name))
}

/// Resolve a device id (or bare name) back to a cpal device.
pub fn device_by_id(id: &str) -> Option<cpal::Device> {
    let (host_part, name_part) = match id.split_once(':') {
        Some((host, name)) => (Some(host), name),
        None => (None, id),
    };

    for host_id in cpal::available_hosts() {
        if let Some(wanted) = host_part {
            if !host_id.name().eq_ignore_ascii_case(wanted) {
                continue;
            }
        }
        let Ok(host) = cpal::host_from_id(host_id) else { continue };
        let Ok(mut devices) = host.devices() else { continue };
        if let Some(device) =
            devices.find(|d| d.name().map(|n| n == name_part).unwrap_or(false))
        {
            return Some(device);
        }
    }

    None
}

/// A kernel-streaming-backed endpoint that advertises itself as a loopback
/// is known to open and then deliver nothing; the engine skips it and goes
/// straight to the probed loopback path.
pub fn is_unreliable_signature(info: &DeviceInfo) -> bool {
    let host = info.host.to_lowercase();
    let name = info.name.to_lowercase();
    let kernel_streaming =
        host.contains("wdm") || host.contains("kernel") || host.ends_with("ks");
    kernel_streaming && name.contains("loopback")
}

fn host_rank(host: &str, order: &[String]) -> usize {
    let host = host.to_lowercase();
    order
        .iter()
        .position(|o| host.contains(&o.to_lowercase()))
        .unwrap_or(order.len())
}

fn push_unique(out: &mut Vec<String>, id: &str) {
    if !out.iter().any(|existing| existing == id) {
        out.push(id.to_string());
    }
}

/// Build the direct-open try-order. Pure over the enumerated table.
pub fn rank_candidates(
    devices: &[DeviceInfo],
    requested: Option<&str>,
    default_input: Option<&str>,
    reliability_order: &[String],
) -> Vec<String> {
    let mut out = Vec::new();

    let requested_dev = requested
        .and_then(|r| devices.iter().find(|d| d.id == r || d.name == r));

    if let Some(dev) = requested_dev {
        push_unique(&mut out, &dev.id);

        let mut alternates: Vec<&DeviceInfo> = devices
            .iter()
            .filter(|d| d.name == dev.name && d.id != dev.id && d.max_input_channels > 0)
            .collect();
        alternates.sort_by_key(|d| host_rank(&d.host, reliability_order));
        for alt in alternates {
            push_unique(&mut out, &alt.id);
        }
    }

    if let Some(id) = default_input {
        push_unique(&mut out, id);
    }

    out
}
