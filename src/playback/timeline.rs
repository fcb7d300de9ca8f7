//! Cumulative Timeline and Row Resolver
//!
//! Maps virtual elapsed time (ms since row 0) to a dataset row.
//!
//! # Invariants
//! - `offsets[0] == 0` and offsets are non-decreasing.
//! - Backward or duplicate raw timestamps contribute a zero step.
//! - For a fixed timeline, non-decreasing virtual times resolve to
//!   non-decreasing rows.

use serde::Serialize;

/// Elapsed-time offsets (ms) from row 0 to each row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CumulativeTimeline {
    offsets: Vec<f64>,
}

impl CumulativeTimeline {
    /// Build from raw per-row timestamps.
    ///
    /// A missing timestamp adds no time and does not replace the previous
    /// valid timestamp used for the next delta.
    pub fn build(raw_ts: &[Option<f64>]) -> Self {
        let mut offsets = Vec::with_capacity(raw_ts.len());
        let mut elapsed = 0.0_f64;
        let mut prev: Option<f64> = None;

        for ts in raw_ts {
            if let (Some(prev_ts), Some(ts)) = (prev, *ts) {
                elapsed += (ts - prev_ts).max(0.0);
            }
            if ts.is_some() {
                prev = *ts;
            }
            offsets.push(elapsed);
        }

        Self { offsets }
    }

    pub fn from_offsets(offsets: Vec<f64>) -> Self {
        debug_assert!(
            offsets.windows(2).all(|w| w[0] <= w[1]),
            "cumulative offsets must be non-decreasing"
        );
        Self { offsets }
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offset of a row, clamped to the last row. 0 for an empty timeline.
    pub fn offset_of(&self, row: usize) -> f64 {
        match self.offsets.len() {
            0 => 0.0,
            n => self.offsets[row.min(n - 1)],
        }
    }

    /// Total span of the recording in ms.
    pub fn total_ms(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    pub fn terminal_row(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn resolve(&self, virtual_time_ms: f64) -> usize {
        resolve(&self.offsets, virtual_time_ms)
    }
}

/// Row whose offset is the last one `<= virtual_time_ms`.
///
/// Right-biased insertion point minus one, clamped to `[0, N-1]`. Times before
/// the first offset resolve to row 0, times past the end to the terminal row.
/// An empty timeline resolves to 0.
pub fn resolve(offsets: &[f64], virtual_time_ms: f64) -> usize {
    if offsets.is_empty() {
        return 0;
    }
    // NaN compares false everywhere, which would land on row 0 anyway.
    let insertion = offsets.partition_point(|&t| t <= virtual_time_ms);
    insertion.saturating_sub(1).min(offsets.len() - 1)
}
