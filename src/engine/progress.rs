// ABOUTME: Progress records emitted after each committed window, and the run summary
// ABOUTME: Records are transient: produced by the engine and consumed immediately by the caller

use std::time::Duration;

use super::watermark::Watermark;

/// Progress after one window's upsert has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Rows applied so far in the current slice
    pub rows_processed_in_slice: u64,
    /// Window-boundary estimate for the current slice
    pub rows_estimated_in_slice: u64,
    /// Planner estimate for the whole run
    pub rows_estimated_in_table: u64,
    /// Index of the current slice, starting at 0
    pub slice_index: usize,
    pub slice_count: usize,
    /// Rows applied so far across all slices of the run
    pub rows_processed_total: u64,
}

impl ProgressRecord {
    /// Processed rows clamped to the slice estimate, which the true count
    /// may exceed.
    pub fn clamped_processed(&self) -> u64 {
        self.rows_processed_in_slice
            .min(self.rows_estimated_in_slice)
    }

    /// Fraction of the current slice done, in `[0, 1]`.
    pub fn slice_fraction(&self) -> f64 {
        if self.rows_estimated_in_slice == 0 {
            return 1.0;
        }
        self.clamped_processed() as f64 / self.rows_estimated_in_slice as f64
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub slices: usize,
    pub windows: u64,
    pub rows_applied: u64,
    /// Lower bound the run started from, `None` if there was nothing to do
    pub watermark_start: Option<Watermark>,
    /// Upper bound captured when the run was planned
    pub watermark_end: Option<Watermark>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return self.rows_applied as f64;
        }
        self.rows_applied as f64 / secs
    }
}
