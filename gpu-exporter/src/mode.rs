use clap::ValueEnum;

/// Where snapshots go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportMode {
    /// Print snapshots as JSON on stdout.
    Stdout,
    /// Serve the latest snapshot on an HTTP `/metrics` endpoint.
    #[default]
    #[value(name = "prometheus-http", alias = "prometheus")]
    PrometheusHttp,
}

/// Which device interface to query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    #[default]
    Nvml,
    /// Simulated devices, for hosts without a GPU.
    Mock,
}
