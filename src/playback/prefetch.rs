//! Prefetch Scheduler
//!
//! Keeps the trace cache populated ahead of the playhead. The horizon grows
//! with playback speed (capped at 2x the base) and the invocation interval
//! stretches at high speed so each run covers more rows.
//!
//! Prefetching is forward-only; rows behind the playhead age out of the LRU.

use serde::Serialize;
use tracing::trace;

use super::cache::{TraceCache, TraceKey};
use super::dataset::Dataset;
use super::error::PlaybackResult;
use super::trace::TraceExtractor;

/// Horizon never exceeds this multiple of the base.
pub const MAX_HORIZON_MULTIPLIER: f64 = 2.0;

/// Speed range over which the invocation interval scales.
const INTERVAL_SPEED_FLOOR: f64 = 1.0;
const INTERVAL_SPEED_CEIL: f64 = 4.0;

/// What the scheduler wants for a given playback speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrefetchPlan {
    pub horizon: usize,
    pub interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PrefetchScheduler {
    base_horizon: usize,
    base_interval_ms: u64,
}

impl PrefetchScheduler {
    /// `base_horizon` is the configured buffer size (frames ahead).
    pub fn new(base_horizon: usize, base_interval_ms: u64) -> Self {
        Self {
            base_horizon: base_horizon.max(1),
            base_interval_ms: base_interval_ms.max(1),
        }
    }

    pub fn base_horizon(&self) -> usize {
        self.base_horizon
    }

    pub fn set_base_horizon(&mut self, base_horizon: usize) {
        self.base_horizon = base_horizon.max(1);
    }

    pub fn base_interval_ms(&self) -> u64 {
        self.base_interval_ms
    }

    /// `base × speed`, clamped to `[base, 2 × base]`.
    pub fn horizon_for_speed(&self, speed: f64) -> usize {
        let base = self.base_horizon as f64;
        let speed = if speed.is_finite() { speed } else { 1.0 };
        (base * speed)
            .clamp(base, base * MAX_HORIZON_MULTIPLIER)
            .round() as usize
    }

    /// Wall-clock spacing between runs: longer at high speed, shorter at low speed.
    pub fn interval_for_speed(&self, speed: f64) -> u64 {
        let speed = if speed.is_finite() { speed } else { 1.0 };
        let factor = speed.clamp(INTERVAL_SPEED_FLOOR, INTERVAL_SPEED_CEIL);
        (self.base_interval_ms as f64 * factor).round() as u64
    }

    pub fn plan(&self, speed: f64) -> PrefetchPlan {
        PrefetchPlan {
            horizon: self.horizon_for_speed(speed),
            interval_ms: self.interval_for_speed(speed),
        }
    }

    /// Whether a run is due, given the last run's wall-clock time.
    pub fn is_due(&self, last_run_ms: Option<i64>, now_ms: i64, speed: f64) -> bool {
        match last_run_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_for_speed(speed) as i64,
        }
    }
}

/// Populate rows `current_row .. current_row + horizon` (clamped to the dataset
/// end). Returns how many rows were newly extracted.
pub fn prefetch(
    cache: &TraceCache,
    extractor: &TraceExtractor,
    dataset: &Dataset,
    current_row: usize,
    horizon: usize,
) -> PlaybackResult<usize> {
    let end = current_row.saturating_add(horizon).min(dataset.len());
    let mut newly_cached = 0;

    for row in current_row..end {
        let key = TraceKey::new(dataset.id(), row);
        if cache.contains(&key) {
            continue;
        }
        let (_, computed) = cache.get_or_compute(key, || extractor.extract(dataset, row))?;
        if computed {
            newly_cached += 1;
        }
    }

    trace!(
        dataset = %dataset.id(),
        current_row,
        horizon,
        newly_cached,
        "Prefetch pass"
    );
    Ok(newly_cached)
}
