pub mod gpu;
pub mod process;

use std::sync::Arc;

use tracing::debug;

use crate::config::ExporterOptions;
use crate::device::DeviceInterface;
use crate::error::DeviceError;
use crate::metrics::TelemetrySnapshot;


/// Queries every enumerated device and assembles one snapshot.
///
/// Fails as a whole if enumeration or any device's identity fails; unsupported
/// or failing optional metrics only blank the affected field.
pub fn take_snapshot(
    devices: &dyn DeviceInterface,
    options: &ExporterOptions,
    captured_at: i64,
) -> Result<TelemetrySnapshot, DeviceError> {
    let handles = devices.enumerate()?;

    let window_start = process::window_start(gpu::now_micros());

    let readings = handles
        .into_iter()
        .map(|handle| gpu::collect_device_reading(devices, handle, options, window_start))
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Collected {} device readings", readings.len());

    Ok(TelemetrySnapshot {
        captured_at_unix_seconds: captured_at,
        readings,
    })
}

/// Snapshot source bound to one device interface and a fixed set of options.
pub trait SnapshotSource: Send + Sync {
    fn build(&self, captured_at: i64) -> Result<TelemetrySnapshot, DeviceError>;
}

pub struct SnapshotBuilder {
    devices: Arc<dyn DeviceInterface>,
    options: ExporterOptions,
}

impl SnapshotBuilder {
    pub fn new(devices: Arc<dyn DeviceInterface>, options: ExporterOptions) -> Self {
        Self { devices, options }
    }
}

impl SnapshotSource for SnapshotBuilder {
    fn build(&self, captured_at: i64) -> Result<TelemetrySnapshot, DeviceError> {
        take_snapshot(self.devices.as_ref(), &self.options, captured_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockDevice, MockDevices};

    fn options() -> ExporterOptions {
        ExporterOptions {
            include_process_breakdown: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_two_device_scenario() {
        let devices = MockDevices::new(vec![
            MockDevice::new("GPU-A")
                .with_memory(16_000_000_000, 12_000_000_000, 4_000_000_000)
                .with_temperature(65),
            MockDevice::new("GPU-B")
                .with_memory(16_000_000_000, 10_000_000_000, 6_000_000_000)
                .with_temperature(70),
        ]);

        let snapshot = take_snapshot(&devices, &options(), 1_700_000_000).unwrap();

        assert_eq!(snapshot.captured_at_unix_seconds, 1_700_000_000);
        assert_eq!(snapshot.device_count(), 2);
        assert_eq!(snapshot.readings[0].uuid, "GPU-A");
        assert_eq!(snapshot.readings[0].index, 0);
        assert_eq!(snapshot.readings[0].temperature_c, Some(65));
        assert_eq!(snapshot.readings[0].memory_total_bytes, Some(16_000_000_000));
        assert_eq!(snapshot.readings[0].memory_free_bytes, Some(12_000_000_000));
        assert_eq!(snapshot.readings[0].memory_used_bytes, Some(4_000_000_000));
        assert_eq!(snapshot.readings[1].uuid, "GPU-B");
        assert_eq!(snapshot.readings[1].index, 1);
        assert_eq!(snapshot.readings[1].fan_speed_percent, None);
    }

    #[test]
    fn test_enumeration_failure_is_fatal() {
        let devices = MockDevices::new(vec![MockDevice::new("GPU-A")]);
        devices.fail_enumeration(Some("NVML lost"));

        let err = take_snapshot(&devices, &options(), 0).unwrap_err();
        assert_eq!(err, DeviceError::Enumeration("NVML lost".into()));
    }

    #[test]
    fn test_identity_failure_on_any_device_fails_build() {
        let devices = MockDevices::new(vec![MockDevice::new("GPU-A"), MockDevice::new("GPU-B")]);
        devices.update(1, |d| d.uuid = None);

        let err = take_snapshot(&devices, &options(), 0).unwrap_err();
        assert!(matches!(err, DeviceError::Identity { index: 1, .. }));
    }

    #[test]
    fn test_empty_host_builds_empty_snapshot() {
        let devices = MockDevices::new(Vec::new());
        let snapshot = take_snapshot(&devices, &options(), 7).unwrap();
        assert!(snapshot.readings.is_empty());
    }

    #[test]
    fn test_builder_uses_its_options() {
        let devices: Arc<dyn DeviceInterface> = Arc::new(MockDevices::new(vec![
            MockDevice::new("GPU-A").with_process(42, 10, 5),
        ]));

        let without = SnapshotBuilder::new(devices.clone(), ExporterOptions::default());
        assert_eq!(without.build(1).unwrap().readings[0].process_utilizations, None);

        let with = SnapshotBuilder::new(devices, options());
        let reading = &with.build(1).unwrap().readings[0];
        assert_eq!(reading.process_utilizations.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_unsupported_memory_does_not_fail_build() {
        let devices = MockDevices::new(vec![
            MockDevice::new("GPU-A").with_memory(16, 12, 4),
            MockDevice::new("GPU-B").with_temperature(70),
        ]);

        let snapshot = take_snapshot(&devices, &options(), 0).unwrap();

        assert_eq!(snapshot.device_count(), 2);
        assert_eq!(snapshot.readings[0].memory_used_bytes, Some(4));
        assert_eq!(snapshot.readings[1].memory_used_bytes, None);
        assert_eq!(snapshot.readings[1].temperature_c, Some(70));
    }

    #[test]
    fn test_each_device_opened_once_per_build() {
        let devices = MockDevices::new(vec![
            MockDevice::new("GPU-A").with_memory(16, 12, 4).with_utilization(5, 5),
            MockDevice::new("GPU-B").with_temperature(70).with_fan_speed(20),
        ]);

        take_snapshot(&devices, &options(), 0).unwrap();
        assert_eq!(devices.opens(), 2);

        take_snapshot(&devices, &options(), 1).unwrap();
        assert_eq!(devices.opens(), 4);
    }
}
