//! Device interface capability.
//!
//! The snapshot builder only talks to devices through [`DeviceInterface`], so
//! the NVML binding and the in-memory mock are interchangeable. Every query may
//! answer [`DeviceError::NotSupported`], which callers treat as "omit this
//! field" rather than as a failure.

pub mod mock;
#[cfg(feature = "nvml")]
pub mod nvml;

use crate::error::DeviceError;
use crate::metrics::{GPUIndex, ProcessUtilization, VgpuUtilization};

/// Identifies one enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub index: GPUIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureSensor {
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub gpu: u32,
    pub memory: u32,
}

/// Process-wide accelerator management interface.
pub trait DeviceInterface: Send + Sync {
    /// Lists the devices currently visible, in enumeration order.
    fn enumerate(&self) -> Result<Vec<DeviceHandle>, DeviceError>;

    /// Resolves the native handle of one device. Queries then go through the
    /// returned value, so the lookup happens once per device and build.
    fn open(&self, device: DeviceHandle) -> Result<Box<dyn DeviceQueries + '_>, DeviceError>;
}

/// Telemetry queries against one opened device.
pub trait DeviceQueries {
    fn uuid(&self) -> Result<String, DeviceError>;

    fn memory_info(&self) -> Result<MemoryInfo, DeviceError>;

    fn temperature(&self, sensor: TemperatureSensor) -> Result<u32, DeviceError>;

    fn utilization_rates(&self) -> Result<Utilization, DeviceError>;

    fn fan_speed(&self) -> Result<u32, DeviceError>;

    /// Raw per-process samples newer than `since_micros`. May include pid 0.
    fn process_utilization(&self, since_micros: u64) -> Result<Vec<ProcessUtilization>, DeviceError>;

    fn vgpu_utilization(&self, since_micros: u64) -> Result<Vec<VgpuUtilization>, DeviceError>;
}
