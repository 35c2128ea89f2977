//! NVML backend.

use nvml_wrapper::enum_wrappers::device::TemperatureSensor as NvmlSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use tracing::{debug, info};

use super::{DeviceHandle, DeviceInterface, DeviceQueries, MemoryInfo, TemperatureSensor, Utilization};
use crate::error::DeviceError;
use crate::metrics::{GPUIndex, ProcessUtilization, VgpuUtilization};

/// Owns the process-wide NVML session.
///
/// Created once at startup with [`NvmlDevices::init`] and released exactly
/// once with [`NvmlDevices::shutdown`].
pub struct NvmlDevices {
    nvml: Nvml,
}

impl NvmlDevices {
    pub fn init() -> Result<Self, DeviceError> {
        let nvml = Nvml::init().map_err(|e| DeviceError::Init(e.to_string()))?;
        match nvml.sys_driver_version() {
            Ok(version) => info!("NVML initialized, driver version {}", version),
            Err(_) => info!("NVML initialized"),
        }
        Ok(Self { nvml })
    }

    pub fn shutdown(self) -> Result<(), DeviceError> {
        self.nvml
            .shutdown()
            .map_err(|e| DeviceError::Shutdown(e.to_string()))
    }
}

fn query_error(index: GPUIndex, metric: &'static str, err: NvmlError) -> DeviceError {
    match err {
        NvmlError::NotSupported => DeviceError::NotSupported,
        other => DeviceError::Query {
            index,
            metric,
            reason: other.to_string(),
        },
    }
}

impl DeviceInterface for NvmlDevices {
    fn enumerate(&self) -> Result<Vec<DeviceHandle>, DeviceError> {
        let count = self
            .nvml
            .device_count()
            .map_err(|e| DeviceError::Enumeration(e.to_string()))?;
        Ok((0..count).map(|index| DeviceHandle { index }).collect())
    }

    fn open(&self, handle: DeviceHandle) -> Result<Box<dyn DeviceQueries + '_>, DeviceError> {
        let device = self
            .nvml
            .device_by_index(handle.index)
            .map_err(|e| DeviceError::Identity {
                index: handle.index,
                reason: e.to_string(),
            })?;
        Ok(Box::new(NvmlDevice {
            index: handle.index,
            device,
        }))
    }
}

/// One NVML device handle, resolved once per build.
struct NvmlDevice<'nvml> {
    index: GPUIndex,
    device: Device<'nvml>,
}

impl DeviceQueries for NvmlDevice<'_> {
    fn uuid(&self) -> Result<String, DeviceError> {
        self.device.uuid().map_err(|e| DeviceError::Identity {
            index: self.index,
            reason: e.to_string(),
        })
    }

    fn memory_info(&self) -> Result<MemoryInfo, DeviceError> {
        let memory = self
            .device
            .memory_info()
            .map_err(|e| query_error(self.index, "memory info", e))?;
        Ok(MemoryInfo {
            total: memory.total,
            free: memory.free,
            used: memory.used,
        })
    }

    fn temperature(&self, sensor: TemperatureSensor) -> Result<u32, DeviceError> {
        let sensor = match sensor {
            TemperatureSensor::Gpu => NvmlSensor::Gpu,
        };
        self.device
            .temperature(sensor)
            .map_err(|e| query_error(self.index, "temperature", e))
    }

    fn utilization_rates(&self) -> Result<Utilization, DeviceError> {
        let rates = self
            .device
            .utilization_rates()
            .map_err(|e| query_error(self.index, "utilization rates", e))?;
        Ok(Utilization {
            gpu: rates.gpu,
            memory: rates.memory,
        })
    }

    fn fan_speed(&self) -> Result<u32, DeviceError> {
        self.device
            .fan_speed(0)
            .map_err(|e| query_error(self.index, "fan speed", e))
    }

    fn process_utilization(&self, since_micros: u64) -> Result<Vec<ProcessUtilization>, DeviceError> {
        match self.device.process_utilization_stats(since_micros) {
            Ok(samples) => Ok(samples
                .into_iter()
                .map(|s| ProcessUtilization {
                    pid: s.pid,
                    sample_timestamp_micros: s.timestamp,
                    mem_util_percent: s.mem_util,
                    sm_util_percent: s.sm_util,
                })
                .collect()),
            // NVML answers NotFound when no process ran during the window.
            Err(NvmlError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(query_error(self.index, "process utilization", e)),
        }
    }

    fn vgpu_utilization(&self, _since_micros: u64) -> Result<Vec<VgpuUtilization>, DeviceError> {
        // nvml-wrapper has no safe binding for nvmlDeviceGetVgpuUtilization.
        debug!("vGPU utilization not available through NVML for device {}", self.index);
        Err(DeviceError::NotSupported)
    }
}
