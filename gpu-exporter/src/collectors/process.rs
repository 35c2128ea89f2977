use crate::metrics::ProcessUtilization;

/// How far back process samples are requested, so a process missed by the
/// most recent 1 s sampling tick is still reported.
pub const PROCESS_LOOKBACK_MICROS: u64 = 5_000_000;

pub fn window_start(now_micros: u64) -> u64 {
    now_micros.saturating_sub(PROCESS_LOOKBACK_MICROS)
}

/// Drops samples with pid 0, which NVML uses for "no active process".
pub fn filter_active(samples: Vec<ProcessUtilization>) -> Vec<ProcessUtilization> {
    samples.into_iter().filter(|p| p.pid > 0).collect()
}
