// ABOUTME: Merge engine - fetches one window from the source and upserts it into the destination
// ABOUTME: Each window is a single atomic upsert; there is no cross-window transaction

use super::backend::{DestinationTable, SourceTable};
use super::cursor::Window;
use super::descriptor::TableDescriptor;
use super::planner::Slice;
use crate::error::Result;

/// Applies windows of source rows to the destination, last writer wins.
pub struct MergeEngine<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a mut D,
}

impl<'a, S, D> MergeEngine<'a, S, D>
where
    S: SourceTable + ?Sized,
    D: DestinationTable + ?Sized,
{
    pub fn new(source: &'a S, destination: &'a mut D) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Fetch the window's rows in watermark order and upsert them.
    ///
    /// Returns the number of source rows applied. Fetching in watermark order
    /// keeps the destination's `MAX(watermark)` meaningful as a resume point:
    /// it only ever reflects fully committed windows.
    pub async fn merge_window(
        &mut self,
        table: &TableDescriptor,
        slice: &Slice,
        window: &Window,
    ) -> Result<u64> {
        let rows = self.source.fetch_window(table, slice, window).await?;
        if rows.is_empty() {
            tracing::debug!(
                "Window {} of slice {} is empty, nothing to apply",
                window.index,
                slice.index
            );
            return Ok(0);
        }

        let fetched = rows.len() as u64;
        let affected = self.destination.upsert(table, &rows).await?;

        tracing::debug!(
            "Window {} of slice {} on {}: {} rows fetched, {} rows affected",
            window.index,
            slice.index,
            table.display_name(),
            fetched,
            affected
        );

        Ok(fetched)
    }
}
