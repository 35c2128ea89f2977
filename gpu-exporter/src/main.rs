use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use gpu_exporter::cache::{ScrapeCache, now_unix_seconds};
use gpu_exporter::collectors::SnapshotBuilder;
use gpu_exporter::config::{self, DEFAULT_PORT, ExporterOptions};
use gpu_exporter::device::DeviceInterface;
use gpu_exporter::device::mock::MockDevices;
use gpu_exporter::exporter::Exporter;
use gpu_exporter::mode::{Backend, ExportMode};
use gpu_exporter::{output, server};


#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    config::init_logging(Some(cli.log_level.as_str()));

    let options = ExporterOptions {
        export_mode: cli.mode,
        include_process_breakdown: cli.process_breakdown,
        include_vgpu: cli.vgpu,
    };

    match cli.backend {
        Backend::Mock => {
            let devices = Arc::new(MockDevices::demo());
            exit_code(run(&cli, options, devices).await)
        }
        Backend::Nvml => run_nvml(&cli, options).await,
    }
}

#[cfg(feature = "nvml")]
async fn run_nvml(cli: &Cli, options: ExporterOptions) -> ExitCode {
    use gpu_exporter::device::nvml::NvmlDevices;

    let devices = match NvmlDevices::init() {
        Ok(devices) => Arc::new(devices),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(cli, options, devices.clone()).await;

    // Every other holder is gone once `run` returns.
    let shutdown = match Arc::try_unwrap(devices) {
        Ok(devices) => devices.shutdown(),
        Err(_) => Err(gpu_exporter::DeviceError::Shutdown(
            "device interface still in use".to_string(),
        )),
    };

    match shutdown {
        Ok(()) => {
            info!("NVML shut down");
            exit_code(result)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "nvml"))]
async fn run_nvml(_cli: &Cli, _options: ExporterOptions) -> ExitCode {
    error!("Built without NVML support, use --backend mock");
    ExitCode::FAILURE
}

async fn run(
    cli: &Cli,
    options: ExporterOptions,
    devices: Arc<dyn DeviceInterface>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cache = ScrapeCache::new(SnapshotBuilder::new(devices, options)).with_min_interval(cli.min_interval);

    match options.export_mode {
        ExportMode::PrometheusHttp => {
            let exporter = Arc::new(Exporter::new(cache, options));
            let addr = SocketAddr::new(cli.listen, cli.port);
            server::serve(addr, exporter).await?;
        }
        ExportMode::Stdout => {
            let cache = Arc::new(cache);

            if !cli.continuous {
                return take_and_print_snapshot(&cache, cli.output.as_deref()).await;
            }

            if !(cli.period > 0.0 && cli.period.is_finite()) {
                return Err(format!("invalid period {}", cli.period).into());
            }

            info!("Starting continuous monitoring with period {}s", cli.period);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(Duration::from_secs_f64(cli.period)) => {}
                }

                if let Err(e) = take_and_print_snapshot(&cache, cli.output.as_deref()).await {
                    error!("Error taking snapshot: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn take_and_print_snapshot(
    cache: &Arc<ScrapeCache>,
    output_folder: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::clone(cache);
    let now = now_unix_seconds();
    let hit = tokio::task::spawn_blocking(move || cache.get_snapshot(now)).await??;

    output::print_snapshot(&hit.snapshot)?;
    if let Some(folder) = output_folder {
        let filepath = output::save_snapshot(&hit.snapshot, folder)?;
        info!("Snapshot saved to: {}", filepath.display());
    }
    Ok(())
}

fn exit_code(result: Result<(), Box<dyn std::error::Error>>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser)]
#[command(name = "gpu-exporter")]
#[command(about = "Exports NVIDIA GPU telemetry for Prometheus", long_about = None)]
struct Cli {
    /// Where snapshots are sent
    #[arg(long, value_enum, default_value_t = ExportMode::PrometheusHttp)]
    mode: ExportMode,

    /// Device interface to query
    #[arg(long, value_enum, default_value_t = Backend::Nvml)]
    backend: Backend,

    /// Address to listen on
    #[arg(long, env = "GPU_EXPORTER_LISTEN", default_value = "0.0.0.0")]
    listen: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "GPU_EXPORTER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, env = "GPU_EXPORTER_LOG", default_value = "info")]
    log_level: String,

    /// Export per-process utilization
    #[arg(long, default_value_t = false)]
    process_breakdown: bool,

    /// Export per-vGPU utilization
    #[arg(long, default_value_t = false)]
    vgpu: bool,

    /// Minimum seconds between two device queries
    #[arg(long, default_value_t = gpu_exporter::MIN_SCRAPE_INTERVAL_SECONDS)]
    min_interval: i64,

    /// Stdout mode: run continuously
    #[arg(long, default_value_t = false)]
    continuous: bool,

    /// Stdout mode: sampling period in seconds
    #[arg(long, default_value_t = 5.0)]
    period: f64,

    /// Stdout mode: also write snapshots to this folder
    #[arg(short, long)]
    output: Option<PathBuf>,
}
