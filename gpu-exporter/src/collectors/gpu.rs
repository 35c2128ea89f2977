use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::collectors::process;
use crate::config::ExporterOptions;
use crate::device::{DeviceHandle, DeviceInterface, TemperatureSensor};
use crate::error::DeviceError;
use crate::metrics::DeviceReading;


pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

pub fn collect_device_reading(
    devices: &dyn DeviceInterface,
    handle: DeviceHandle,
    options: &ExporterOptions,
    window_start: u64,
) -> Result<DeviceReading, DeviceError> {
    let index = handle.index;
    let device = devices.open(handle)?;

    let uuid = device.uuid().map_err(|e| match e {
        DeviceError::Identity { .. } => e,
        other => DeviceError::Identity {
            index,
            reason: other.to_string(),
        },
    })?;

    let memory = optional(device.memory_info(), handle, "memory info");
    let temperature_c = optional(
        device.temperature(TemperatureSensor::Gpu),
        handle,
        "temperature",
    );
    let fan_speed_percent = optional(device.fan_speed(), handle, "fan speed");
    let utilization = optional(device.utilization_rates(), handle, "utilization rates");

    let process_utilizations = options
        .include_process_breakdown
        .then(|| {
            optional(
                device.process_utilization(window_start),
                handle,
                "process utilization",
            )
        })
        .flatten()
        .map(process::filter_active);

    let vgpu_utilizations = options
        .include_vgpu
        .then(|| {
            optional(
                device.vgpu_utilization(window_start),
                handle,
                "vgpu utilization",
            )
        })
        .flatten();

    Ok(DeviceReading {
        uuid,
        index,
        memory_total_bytes: memory.map(|m| m.total),
        memory_free_bytes: memory.map(|m| m.free),
        memory_used_bytes: memory.map(|m| m.used),
        temperature_c,
        fan_speed_percent,
        gpu_utilization_percent: utilization.map(|u| u.gpu),
        memory_utilization_percent: utilization.map(|u| u.memory),
        process_utilizations,
        vgpu_utilizations,
    })
}

// Absorbs per-field failures: the field is left blank instead of failing the device.
fn optional<T>(result: Result<T, DeviceError>, handle: DeviceHandle, metric: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if !e.is_fatal_to_build() => {
            debug!("{} not supported on device {}", metric, handle.index);
            None
        }
        Err(e) => {
            warn!("Unable to read {} of device {}: {}", metric, handle.index, e);
            None
        }
    }
}
