//! In-memory device backend for tests and GPU-less hosts.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::info;

use super::{DeviceHandle, DeviceInterface, DeviceQueries, MemoryInfo, TemperatureSensor, Utilization};
use crate::error::DeviceError;
use crate::metrics::{ProcessUtilization, VgpuUtilization};

/// Scripted state of one mock device. `None` on a query means the device
/// reports it as not supported.
#[derive(Debug, Clone, PartialEq)]
pub struct MockDevice {
    /// `None` makes identity resolution fail.
    pub uuid: Option<String>,
    pub memory: Option<MemoryInfo>,
    pub temperature: Option<u32>,
    pub fan_speed: Option<u32>,
    pub utilization: Option<Utilization>,
    pub processes: Option<Vec<ProcessUtilization>>,
    pub vgpus: Option<Vec<VgpuUtilization>>,
}

impl MockDevice {
    /// A device that supports nothing but identity and process sampling,
    /// with no process active.
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            memory: None,
            temperature: None,
            fan_speed: None,
            utilization: None,
            processes: Some(Vec::new()),
            vgpus: None,
        }
    }

    pub fn with_memory(mut self, total: u64, free: u64, used: u64) -> Self {
        self.memory = Some(MemoryInfo { total, free, used });
        self
    }

    pub fn with_temperature(mut self, celsius: u32) -> Self {
        self.temperature = Some(celsius);
        self
    }

    pub fn with_fan_speed(mut self, percent: u32) -> Self {
        self.fan_speed = Some(percent);
        self
    }

    pub fn with_utilization(mut self, gpu: u32, memory: u32) -> Self {
        self.utilization = Some(Utilization { gpu, memory });
        self
    }

    pub fn with_process(mut self, pid: u32, sm_util: u32, mem_util: u32) -> Self {
        self.processes.get_or_insert_with(Vec::new).push(ProcessUtilization {
            pid,
            sample_timestamp_micros: 0,
            mem_util_percent: mem_util,
            sm_util_percent: sm_util,
        });
        self
    }

    pub fn without_process_sampling(mut self) -> Self {
        self.processes = None;
        self
    }

    pub fn with_vgpu(mut self, instance: u32, sm_util: u32, mem_util: u32) -> Self {
        self.vgpus.get_or_insert_with(Vec::new).push(VgpuUtilization {
            vgpu_instance: instance,
            sample_timestamp_micros: 0,
            sm_util_percent: sm_util,
            mem_util_percent: mem_util,
        });
        self
    }
}

/// Mock device set with injectable failures and call counters.
#[derive(Debug, Default)]
pub struct MockDevices {
    devices: Mutex<Vec<MockDevice>>,
    enumeration_failure: Mutex<Option<String>>,
    enumerations: AtomicUsize,
    opens: AtomicUsize,
    last_process_window: Mutex<Option<u64>>,
}

impl MockDevices {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    /// Two plausible devices for running the exporter without a GPU.
    pub fn demo() -> Self {
        info!("Using mock device backend");
        let gib = 1024 * 1024 * 1024;
        Self::new(
            (0..2u64)
                .map(|i| {
                    let total = 8 * gib;
                    let used = 2 * gib + i * 512 * 1024 * 1024;
                    MockDevice::new(&format!("GPU-00000000-0000-0000-0000-00000000000{i}"))
                        .with_memory(total, total - used, used)
                        .with_temperature(65 + i as u32 * 5)
                        .with_fan_speed(60 + i as u32 * 5)
                        .with_utilization(45 + i as u32 * 10, 30 + i as u32 * 8)
                        .with_process(1234 + i as u32, 40, 20)
                })
                .collect(),
        )
    }

    /// Makes every following enumeration fail with `reason`, or succeed again with `None`.
    pub fn fail_enumeration(&self, reason: Option<&str>) {
        *self.enumeration_failure.lock() = reason.map(str::to_string);
    }

    pub fn update(&self, index: usize, change: impl FnOnce(&mut MockDevice)) {
        if let Some(device) = self.devices.lock().get_mut(index) {
            change(device);
        }
    }

    pub fn push(&self, device: MockDevice) {
        self.devices.lock().push(device);
    }

    /// Number of enumerations performed so far, i.e. the number of builds attempted.
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    /// Number of device handles resolved so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Window start passed to the most recent process utilization query.
    pub fn last_process_window(&self) -> Option<u64> {
        *self.last_process_window.lock()
    }
}

impl DeviceInterface for MockDevices {
    fn enumerate(&self) -> Result<Vec<DeviceHandle>, DeviceError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.enumeration_failure.lock().clone() {
            return Err(DeviceError::Enumeration(reason));
        }
        let count = self.devices.lock().len() as u32;
        Ok((0..count).map(|index| DeviceHandle { index }).collect())
    }

    fn open(&self, handle: DeviceHandle) -> Result<Box<dyn DeviceQueries + '_>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let device = self
            .devices
            .lock()
            .get(handle.index as usize)
            .cloned()
            .ok_or_else(|| DeviceError::Identity {
                index: handle.index,
                reason: "no such device".to_string(),
            })?;
        Ok(Box::new(OpenedMockDevice {
            owner: self,
            index: handle.index,
            device,
        }))
    }
}

struct OpenedMockDevice<'a> {
    owner: &'a MockDevices,
    index: u32,
    device: MockDevice,
}

impl DeviceQueries for OpenedMockDevice<'_> {
    fn uuid(&self) -> Result<String, DeviceError> {
        self.device.uuid.clone().ok_or_else(|| DeviceError::Identity {
            index: self.index,
            reason: "uuid unavailable".to_string(),
        })
    }

    fn memory_info(&self) -> Result<MemoryInfo, DeviceError> {
        self.device.memory.ok_or(DeviceError::NotSupported)
    }

    fn temperature(&self, _sensor: TemperatureSensor) -> Result<u32, DeviceError> {
        self.device.temperature.ok_or(DeviceError::NotSupported)
    }

    fn utilization_rates(&self) -> Result<Utilization, DeviceError> {
        self.device.utilization.ok_or(DeviceError::NotSupported)
    }

    fn fan_speed(&self) -> Result<u32, DeviceError> {
        self.device.fan_speed.ok_or(DeviceError::NotSupported)
    }

    fn process_utilization(&self, since_micros: u64) -> Result<Vec<ProcessUtilization>, DeviceError> {
        *self.owner.last_process_window.lock() = Some(since_micros);
        self.device.processes.clone().ok_or(DeviceError::NotSupported)
    }

    fn vgpu_utilization(&self, _since_micros: u64) -> Result<Vec<VgpuUtilization>, DeviceError> {
        self.device.vgpus.clone().ok_or(DeviceError::NotSupported)
    }
}
