//! Samples GPU telemetry through NVML and serves the latest snapshot on a
//! Prometheus `/metrics` endpoint.
//!
//! Device queries are driven by scrapes: the [`cache::ScrapeCache`] rebuilds
//! its snapshot at most once per [`cache::MIN_SCRAPE_INTERVAL_SECONDS`], no
//! matter how many scrapes arrive.

pub mod cache;
pub mod collectors;
pub mod config;
pub mod device;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod mode;
pub mod output;
pub mod server;

pub use cache::{CachedSnapshot, Freshness, MIN_SCRAPE_INTERVAL_SECONDS, ScrapeCache};
pub use collectors::{SnapshotBuilder, SnapshotSource};
pub use config::ExporterOptions;
pub use device::{DeviceInterface, DeviceQueries};
pub use error::{DeviceError, ExportError, ServerError};
pub use exporter::Exporter;
pub use metrics::{DeviceReading, ProcessUtilization, TelemetrySnapshot};
