//! Scrape cache.
//!
//! Holds the last good [`TelemetrySnapshot`] and rebuilds it at most once per
//! `min_interval` seconds. The interval check, the build and the swap all run
//! under one lock: concurrent callers trigger at most one build and every
//! caller receives a shared handle to a complete snapshot.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::collectors::SnapshotSource;
use crate::error::DeviceError;
use crate::metrics::TelemetrySnapshot;

/// Minimum number of seconds between two device queries.
pub const MIN_SCRAPE_INTERVAL_SECONDS: i64 = 5;

pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[derive(Debug)]
enum CacheState {
    Empty,
    Populated {
        snapshot: Arc<TelemetrySnapshot>,
        captured_at: i64,
    },
}

/// How a served snapshot relates to the call that returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Built during this call.
    Refreshed,
    /// Reused; the interval had not elapsed.
    Cached,
    /// The rebuild failed and the previous snapshot is served instead.
    Stale(DeviceError),
}

#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Arc<TelemetrySnapshot>,
    pub freshness: Freshness,
}

impl CachedSnapshot {
    pub fn refresh_failed(&self) -> bool {
        matches!(self.freshness, Freshness::Stale(_))
    }
}

pub struct ScrapeCache {
    source: Box<dyn SnapshotSource>,
    state: Mutex<CacheState>,
    min_interval: i64,
}

impl ScrapeCache {
    pub fn new(source: impl SnapshotSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            state: Mutex::new(CacheState::Empty),
            min_interval: MIN_SCRAPE_INTERVAL_SECONDS,
        }
    }

    pub fn with_min_interval(mut self, seconds: i64) -> Self {
        self.min_interval = seconds;
        self
    }

    /// Returns the current snapshot, rebuilding it when more than
    /// `min_interval` seconds passed since the last successful build or when
    /// nothing was built yet.
    ///
    /// A failed rebuild leaves the cache untouched. It is an error only when
    /// there is no previous snapshot to fall back to.
    pub fn get_snapshot(&self, now: i64) -> Result<CachedSnapshot, DeviceError> {
        let mut state = self.state.lock();

        if let CacheState::Populated {
            snapshot,
            captured_at,
        } = &*state
        {
            if now.saturating_sub(*captured_at) <= self.min_interval {
                return Ok(CachedSnapshot {
                    snapshot: Arc::clone(snapshot),
                    freshness: Freshness::Cached,
                });
            }
        }

        match self.source.build(now) {
            Ok(snapshot) => {
                debug!(
                    "Refreshed snapshot at {} with {} devices",
                    now,
                    snapshot.device_count()
                );
                let snapshot = Arc::new(snapshot);
                *state = CacheState::Populated {
                    snapshot: Arc::clone(&snapshot),
                    captured_at: now,
                };
                Ok(CachedSnapshot {
                    snapshot,
                    freshness: Freshness::Refreshed,
                })
            }
            Err(e) => match &*state {
                CacheState::Empty => {
                    warn!("Snapshot build failed with no previous snapshot: {}", e);
                    Err(e)
                }
                CacheState::Populated {
                    snapshot,
                    captured_at,
                } => {
                    warn!(
                        "Snapshot build failed, serving snapshot from {}: {}",
                        captured_at, e
                    );
                    Ok(CachedSnapshot {
                        snapshot: Arc::clone(snapshot),
                        freshness: Freshness::Stale(e),
                    })
                }
            },
        }
    }

    /// Capture time of the cached snapshot, 0 when nothing was built yet.
    pub fn last_captured_at(&self) -> i64 {
        match &*self.state.lock() {
            CacheState::Empty => 0,
            CacheState::Populated { captured_at, .. } => *captured_at,
        }
    }
}
