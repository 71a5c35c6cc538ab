// ABOUTME: Terminal progress rendering for replication runs
// ABOUTME: One indicatif bar per slice, showing throughput, percent and ETA

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::engine::progress::{ProgressRecord, RunSummary};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg} [{bar:30.cyan/blue}] {percent}% ({per_sec}, ETA {eta})";

/// Renders progress records as they arrive.
///
/// The bar length is the current slice's estimate; processed rows are
/// clamped to it because the true count may be higher.
pub struct ProgressReporter {
    bar: ProgressBar,
    slice_index: Option<usize>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// A reporter that draws nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden()))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message("Instancing");
        Self {
            bar,
            slice_index: None,
        }
    }

    pub fn update(&mut self, record: &ProgressRecord) {
        if self.slice_index != Some(record.slice_index) {
            self.slice_index = Some(record.slice_index);
            self.bar.reset();
            self.bar.set_length(record.rows_estimated_in_slice);
            self.bar.set_message(format!(
                "Syncing slice {}/{}",
                record.slice_index + 1,
                record.slice_count
            ));
        }
        self.bar.set_length(record.rows_estimated_in_slice);
        self.bar.set_position(record.clamped_processed());
    }

    /// Clear the bar and print the run's outcome.
    pub fn finish(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        if summary.rows_applied == 0 {
            println!("No rows left to sync.");
        } else {
            println!(
                "{} rows synced in {} windows over {} slices ({:.0} rows/s).",
                summary.rows_applied,
                summary.windows,
                summary.slices,
                summary.rows_per_second()
            );
        }
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slice_index: usize, processed: u64, estimated: u64) -> ProgressRecord {
        ProgressRecord {
            rows_processed_in_slice: processed,
            rows_estimated_in_slice: estimated,
            rows_estimated_in_table: estimated * 2,
            slice_index,
            slice_count: 2,
            rows_processed_total: processed,
        }
    }

    #[test]
    fn test_position_is_clamped_to_slice_estimate() {
        let mut reporter = ProgressReporter::hidden();
        reporter.update(&record(0, 50, 100));
        assert_eq!(reporter.position(), 50);
        assert_eq!(reporter.length(), Some(100));

        reporter.update(&record(0, 130, 100));
        assert_eq!(reporter.position(), 100);
    }

    #[test]
    fn test_new_slice_resets_bar() {
        let mut reporter = ProgressReporter::hidden();
        reporter.update(&record(0, 100, 100));
        reporter.update(&record(1, 10, 40));
        assert_eq!(reporter.position(), 10);
        assert_eq!(reporter.length(), Some(40));
    }
}
