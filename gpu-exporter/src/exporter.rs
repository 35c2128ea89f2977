//! Renders snapshots in the Prometheus text exposition format.
//!
//! Each render builds its own registry from an immutable snapshot, so
//! concurrent scrapes never share mutable gauges.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::cache::{CachedSnapshot, ScrapeCache};
use crate::config::ExporterOptions;
use crate::error::ExportError;
use crate::metrics::{DeviceReading, ProcessUtilization};

const DEVICE_LABELS: &[&str] = &["gpu", "uuid"];

type Row = (Vec<String>, f64);

/// Drives the scrape cache and renders whatever it serves.
pub struct Exporter {
    cache: ScrapeCache,
    options: ExporterOptions,
}

impl Exporter {
    pub fn new(cache: ScrapeCache, options: ExporterOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &ScrapeCache {
        &self.cache
    }

    /// Serves one scrape at time `now`, refreshing the cache if it is stale.
    pub fn scrape(&self, now: i64) -> Result<String, ExportError> {
        let hit = self.cache.get_snapshot(now)?;
        render(&hit, &self.options)
    }
}

pub fn render(hit: &CachedSnapshot, options: &ExporterOptions) -> Result<String, ExportError> {
    let registry = Registry::new();
    let readings = &hit.snapshot.readings;

    register_device_gauge(&registry, "fan_speed_percent", "Fan speed as a percent of maximum.", readings, |r| {
        r.fan_speed_percent.map(f64::from)
    })?;
    register_device_gauge(&registry, "memory_free_bytes", "Unallocated device memory in bytes.", readings, |r| {
        r.memory_free_bytes.map(|v| v as f64)
    })?;
    register_device_gauge(&registry, "memory_total_bytes", "Total installed device memory in bytes.", readings, |r| {
        r.memory_total_bytes.map(|v| v as f64)
    })?;
    register_device_gauge(&registry, "memory_used_bytes", "Allocated device memory in bytes.", readings, |r| {
        r.memory_used_bytes.map(|v| v as f64)
    })?;
    register_device_gauge(
        &registry,
        "utilization_gpu_percent",
        "Percent of time over the past sample period during which one or more kernels was executing on the GPU.",
        readings,
        |r| r.gpu_utilization_percent.map(f64::from),
    )?;
    register_device_gauge(
        &registry,
        "utilization_memory_percent",
        "Percent of time over the past sample period during which device memory was being read or written.",
        readings,
        |r| r.memory_utilization_percent.map(f64::from),
    )?;
    register_device_gauge(&registry, "temperature_celsius", "GPU core temperature in degrees Celsius.", readings, |r| {
        r.temperature_c.map(f64::from)
    })?;

    if options.include_process_breakdown {
        register_process_gauges(&registry, readings)?;
    }

    if options.include_vgpu {
        let rows = readings
            .iter()
            .flat_map(|r| {
                r.vgpu_utilizations.iter().flatten().map(move |v| {
                    let mut labels = device_labels(r);
                    labels.push(v.vgpu_instance.to_string());
                    (labels, f64::from(v.sm_util_percent))
                })
            })
            .collect();
        register_gauge_vec(
            &registry,
            "vgpu_sm_utilization_percent",
            "SM utilization of a vGPU instance over the lookback window.",
            &["gpu", "uuid", "vgpu_instance"],
            rows,
        )?;
    }

    let captured_at = Gauge::new(
        "snapshot_timestamp_seconds",
        "Unix time at which the served snapshot was captured.",
    )?;
    captured_at.set(hit.snapshot.captured_at_unix_seconds as f64);
    registry.register(Box::new(captured_at))?;

    let refresh_failed = Gauge::new(
        "last_refresh_failed",
        "1 if the latest refresh failed and an older snapshot is served, else 0.",
    )?;
    refresh_failed.set(if hit.refresh_failed() { 1.0 } else { 0.0 });
    registry.register(Box::new(refresh_failed))?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| ExportError::Encoding(e.to_string()))?;

    debug!("Rendered {} bytes for {} devices", buffer.len(), readings.len());

    String::from_utf8(buffer).map_err(|e| ExportError::Encoding(e.to_string()))
}

fn device_labels(reading: &DeviceReading) -> Vec<String> {
    vec![reading.index.to_string(), reading.uuid.clone()]
}

fn register_device_gauge(
    registry: &Registry,
    name: &str,
    help: &str,
    readings: &[DeviceReading],
    value: impl Fn(&DeviceReading) -> Option<f64>,
) -> Result<(), ExportError> {
    let rows = readings
        .iter()
        .filter_map(|r| value(r).map(|v| (device_labels(r), v)))
        .collect();
    register_gauge_vec(registry, name, help, DEVICE_LABELS, rows)
}

fn register_process_gauges(registry: &Registry, readings: &[DeviceReading]) -> Result<(), ExportError> {
    let process_rows = |value: fn(&ProcessUtilization) -> u32| -> Vec<Row> {
        readings
            .iter()
            .flat_map(|r| {
                r.process_utilizations.iter().flatten().map(move |p| {
                    let mut labels = device_labels(r);
                    labels.push(p.pid.to_string());
                    (labels, f64::from(value(p)))
                })
            })
            .collect()
    };

    let labels = &["gpu", "uuid", "pid"];
    register_gauge_vec(
        registry,
        "process_sm_utilization_percent",
        "SM utilization attributed to a process over the lookback window.",
        labels,
        process_rows(|p| p.sm_util_percent),
    )?;
    register_gauge_vec(
        registry,
        "process_memory_utilization_percent",
        "Memory controller utilization attributed to a process over the lookback window.",
        labels,
        process_rows(|p| p.mem_util_percent),
    )?;
    register_device_gauge(
        registry,
        "process_sm_utilization_total_percent",
        "Sum of SM utilization over all processes active on the device.",
        readings,
        |r| r.total_process_sm_util().map(f64::from),
    )
}

// A family without rows is skipped entirely so absent values leave no trace.
fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    rows: Vec<Row>,
) -> Result<(), ExportError> {
    if rows.is_empty() {
        return Ok(());
    }

    let gauges = GaugeVec::new(Opts::new(name, help), labels)?;
    for (values, value) in &rows {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        gauges.get_metric_with_label_values(&values)?.set(*value);
    }
    registry.register(Box::new(gauges))?;
    Ok(())
}
