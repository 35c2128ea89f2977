use serde::Serialize;

pub type Pid = u32;
pub type GPUIndex = u32;


/// Immutable set of device readings captured at one point in time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub captured_at_unix_seconds: i64,
    /// One reading per enumerated device, in enumeration order.
    pub readings: Vec<DeviceReading>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub uuid: String,
    pub index: GPUIndex,

    // None when the device or driver does not support the query.
    pub memory_total_bytes: Option<u64>,
    pub memory_free_bytes: Option<u64>,
    pub memory_used_bytes: Option<u64>,

    pub temperature_c: Option<u32>,
    pub fan_speed_percent: Option<u32>,
    pub gpu_utilization_percent: Option<u32>,
    pub memory_utilization_percent: Option<u32>,

    /// None when the breakdown is disabled or the query did not succeed.
    pub process_utilizations: Option<Vec<ProcessUtilization>>,
    pub vgpu_utilizations: Option<Vec<VgpuUtilization>>,
}

impl DeviceReading {
    /// Sum of SM utilization over the processes active on this device, or
    /// `None` when no process list was read.
    pub fn total_process_sm_util(&self) -> Option<u32> {
        self.process_utilizations
            .as_ref()
            .map(|processes| processes.iter().map(|p| p.sm_util_percent).sum())
    }
}

/// One process's share of a device over the sampling window.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessUtilization {
    pub pid: Pid,
    pub sample_timestamp_micros: u64,
    pub mem_util_percent: u32,
    pub sm_util_percent: u32,
}

/// Utilization of one vGPU instance hosted on a device.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgpuUtilization {
    pub vgpu_instance: u32,
    pub sample_timestamp_micros: u64,
    pub sm_util_percent: u32,
    pub mem_util_percent: u32,
}

impl TelemetrySnapshot {
    pub fn device_count(&self) -> usize {
        self.readings.len()
    }
}
