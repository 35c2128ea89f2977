//! Runtime options and logging setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::mode::ExportMode;

/// Port conventionally used by GPU exporters.
pub const DEFAULT_PORT: u16 = 9177;

/// Switches shared by the snapshot builder and the exporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExporterOptions {
    pub export_mode: ExportMode,
    /// Query and expose per-process utilization.
    pub include_process_breakdown: bool,
    /// Query and expose per-vGPU utilization.
    pub include_vgpu: bool,
}

/// Parses a log level, falling back to `info` when it is missing or invalid.
pub fn resolve_level(raw: Option<&str>) -> LevelFilter {
    raw.map(str::trim)
        .filter(|level| !level.is_empty())
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO)
}

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::builder()
        .with_default_directive(resolve_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
