// ABOUTME: Traits separating the replication engine from the databases it talks to
// ABOUTME: SourceTable reads and estimates, DestinationTable reports its watermark and upserts

use async_trait::async_trait;

use super::cursor::Window;
use super::descriptor::TableDescriptor;
use super::planner::Slice;
use super::watermark::Watermark;
use crate::error::Result;

/// One row in column order. Values travel in their text representation and
/// are cast back to the column type by the destination.
pub type RowValues = Vec<Option<String>>;

/// Read side of a replication run.
///
/// Every method receives the descriptor reflected at session start so
/// implementations never re-query the schema mid-run.
#[async_trait]
pub trait SourceTable: Send + Sync {
    /// Reflect the table structure. Fails with a schema error if the table or
    /// its watermark column is missing.
    async fn describe(&self) -> Result<TableDescriptor>;

    /// `MIN(watermark)`, `None` for an empty table.
    async fn min_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>>;

    /// `MAX(watermark)`, `None` for an empty table.
    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>>;

    /// Upper bound of this run, captured once when the run is planned.
    async fn run_start(&self, table: &TableDescriptor) -> Result<Watermark>;

    /// Approximate number of rows with a watermark in `[lower, upper]`,
    /// obtained without scanning them.
    async fn estimate_rows(
        &self,
        table: &TableDescriptor,
        lower: Watermark,
        upper: Watermark,
    ) -> Result<u64>;

    /// Watermark of every `chunk_size`-th row of the slice (rows numbered
    /// from 1 in watermark order, boundaries at rows 1, 1 + chunk_size, ...).
    async fn window_boundaries(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        chunk_size: usize,
    ) -> Result<Vec<Watermark>>;

    /// Rows of `slice` that fall in `window`, ordered by watermark ascending.
    async fn fetch_window(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        window: &Window,
    ) -> Result<Vec<RowValues>>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}

/// Write side of a replication run.
#[async_trait]
pub trait DestinationTable: Send + Sync {
    /// Make sure the destination table exists and matches `source`, creating
    /// it from the source structure when absent. Returns the destination's
    /// own descriptor.
    async fn prepare(&mut self, source: &TableDescriptor) -> Result<TableDescriptor>;

    /// `MAX(watermark)` of the rows already replicated.
    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>>;

    /// Insert `rows`; on primary-key conflict overwrite every non-key column.
    /// The whole call is one atomic operation.
    async fn upsert(&mut self, table: &TableDescriptor, rows: &[RowValues]) -> Result<u64>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}
