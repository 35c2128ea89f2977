use std::sync::{Arc, Barrier};
use std::thread;

use gpu_exporter::device::mock::{MockDevice, MockDevices};
use gpu_exporter::{ExportError, Exporter, ExporterOptions, Freshness, ScrapeCache, SnapshotBuilder};

fn two_gpu_host() -> Arc<MockDevices> {
    Arc::new(MockDevices::new(vec![
        MockDevice::new("GPU-A")
            .with_memory(16_000_000_000, 12_000_000_000, 4_000_000_000)
            .with_temperature(65)
            .with_fan_speed(30),
        MockDevice::new("GPU-B").with_memory(16_000_000_000, 12_000_000_000, 4_000_000_000),
    ]))
}

fn exporter(devices: &Arc<MockDevices>, options: ExporterOptions) -> Exporter {
    let cache = ScrapeCache::new(SnapshotBuilder::new(devices.clone(), options));
    Exporter::new(cache, options)
}

#[test]
fn test_two_gpu_scenario() {
    let devices = two_gpu_host();
    let exporter = exporter(&devices, ExporterOptions::default());

    let hit = exporter.cache().get_snapshot(1_000).unwrap();
    let readings = &hit.snapshot.readings;

    assert_eq!(readings.len(), 2);
    assert_eq!((readings[0].index, readings[0].uuid.as_str()), (0, "GPU-A"));
    assert_eq!((readings[1].index, readings[1].uuid.as_str()), (1, "GPU-B"));
    assert_eq!(readings[0].temperature_c, Some(65));
    assert_eq!(readings[1].fan_speed_percent, None);
    assert_eq!(readings[0].memory_used_bytes, Some(4_000_000_000));
}

#[test]
fn test_unsupported_temperature_is_not_exported_as_zero() {
    let devices = two_gpu_host();
    let exporter = exporter(&devices, ExporterOptions::default());

    let text = exporter.scrape(1_000).unwrap();

    assert!(text.contains(r#"temperature_celsius{gpu="0",uuid="GPU-A"} 65"#));
    assert!(!text.contains(r#"temperature_celsius{gpu="1""#));
    assert!(!text.contains(r#"fan_speed_percent{gpu="1""#));
    assert!(text.contains(r#"memory_total_bytes{gpu="1",uuid="GPU-B"} 16000000000"#));
}

#[test]
fn test_concurrent_scrapes_query_devices_once() {
    const SCRAPERS: usize = 8;
    let devices = two_gpu_host();
    let exporter = Arc::new(exporter(&devices, ExporterOptions::default()));
    let barrier = Arc::new(Barrier::new(SCRAPERS));

    let bodies: Vec<String> = (0..SCRAPERS)
        .map(|i| {
            let exporter = Arc::clone(&exporter);
            let barrier = Arc::clone(&barrier);
            // All within one interval window.
            thread::spawn(move || {
                barrier.wait();
                exporter.scrape(2_000 + (i % 3) as i64).unwrap()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(devices.enumerations(), 1);
    assert!(bodies.iter().all(|b| b == &bodies[0]));
}

#[test]
fn test_transient_failure_serves_last_good_snapshot() {
    let devices = two_gpu_host();
    let exporter = exporter(&devices, ExporterOptions::default());

    let first = exporter.cache().get_snapshot(100).unwrap();
    assert_eq!(first.freshness, Freshness::Refreshed);

    devices.fail_enumeration(Some("GPU is lost"));
    devices.update(0, |d| d.temperature = Some(90));

    let text = exporter.scrape(200).unwrap();
    assert!(text.contains("last_refresh_failed 1"));
    assert!(text.contains("snapshot_timestamp_seconds 100"));
    assert!(text.contains(r#"temperature_celsius{gpu="0",uuid="GPU-A"} 65"#));

    devices.fail_enumeration(None);
    let text = exporter.scrape(201).unwrap();
    assert!(text.contains("last_refresh_failed 0"));
    assert!(text.contains("snapshot_timestamp_seconds 201"));
    assert!(text.contains(r#"temperature_celsius{gpu="0",uuid="GPU-A"} 90"#));
}

#[test]
fn test_first_scrape_failure_is_an_error() {
    let devices = two_gpu_host();
    devices.fail_enumeration(Some("Driver Not Loaded"));
    let exporter = exporter(&devices, ExporterOptions::default());

    let err = exporter.scrape(5).unwrap_err();
    assert!(matches!(err, ExportError::Scrape(_)));
    assert_eq!(exporter.cache().last_captured_at(), 0);
}

#[test]
fn test_new_device_appears_after_interval() {
    let devices = two_gpu_host();
    let exporter = exporter(&devices, ExporterOptions::default());
    assert_eq!(exporter.cache().get_snapshot(10).unwrap().snapshot.readings.len(), 2);

    devices.push(MockDevice::new("GPU-C"));
    assert_eq!(exporter.cache().get_snapshot(15).unwrap().snapshot.readings.len(), 2);
    assert_eq!(exporter.cache().get_snapshot(16).unwrap().snapshot.readings.len(), 3);
}

#[test]
fn test_process_breakdown_end_to_end() {
    let devices = Arc::new(MockDevices::new(vec![
        MockDevice::new("GPU-A")
            .with_process(0, 99, 99)
            .with_process(31337, 42, 8),
    ]));
    let options = ExporterOptions {
        include_process_breakdown: true,
        ..Default::default()
    };
    let exporter = exporter(&devices, options);

    let text = exporter.scrape(1).unwrap();
    assert!(text.contains(r#"process_sm_utilization_percent{gpu="0",pid="31337",uuid="GPU-A"} 42"#));
    assert!(!text.contains(r#"pid="0""#));
    assert!(text.contains(r#"process_sm_utilization_total_percent{gpu="0",uuid="GPU-A"} 42"#));
}

#[test]
fn test_device_without_memory_info_is_still_exported() {
    let devices = two_gpu_host();
    devices.update(1, |d| {
        d.memory = None;
        d.temperature = Some(58);
    });
    let exporter = exporter(&devices, ExporterOptions::default());

    let text = exporter.scrape(1_000).unwrap();

    assert!(text.contains("last_refresh_failed 0"));
    assert!(text.contains(r#"memory_used_bytes{gpu="0",uuid="GPU-A"} 4000000000"#));
    assert!(text.contains(r#"temperature_celsius{gpu="0",uuid="GPU-A"} 65"#));
    assert!(text.contains(r#"temperature_celsius{gpu="1",uuid="GPU-B"} 58"#));
    assert!(!text.contains(r#"memory_total_bytes{gpu="1""#));
    assert!(!text.contains(r#"memory_free_bytes{gpu="1""#));
    assert!(!text.contains(r#"memory_used_bytes{gpu="1""#));
}

#[test]
fn test_unsupported_process_sampling_has_no_total() {
    let devices = Arc::new(MockDevices::new(vec![
        MockDevice::new("GPU-A").with_process(77, 15, 3),
        MockDevice::new("GPU-B").without_process_sampling(),
    ]));
    let options = ExporterOptions {
        include_process_breakdown: true,
        ..Default::default()
    };
    let exporter = exporter(&devices, options);

    let text = exporter.scrape(1).unwrap();

    assert!(text.contains(r#"process_sm_utilization_total_percent{gpu="0",uuid="GPU-A"} 15"#));
    assert!(!text.contains(r#"process_sm_utilization_total_percent{gpu="1""#));
    assert!(!text.contains(r#"uuid="GPU-B"} 0"#));
}
