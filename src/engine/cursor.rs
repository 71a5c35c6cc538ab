// ABOUTME: Windowed cursor - keyset pagination of a slice into chunk-sized windows
// ABOUTME: Samples every chunk_size-th watermark once, then emits boundary-delimited predicates

use super::backend::SourceTable;
use super::descriptor::TableDescriptor;
use super::planner::Slice;
use super::watermark::Watermark;
use crate::error::Result;

/// A sub-range of a slice: `start <= watermark < end`, or `start <= watermark`
/// (up to the slice's upper bound) for the last window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Position within the slice, starting at 0
    pub index: usize,
    pub start: Watermark,
    /// Exclusive upper boundary; `None` for the last window of a slice
    pub end: Option<Watermark>,
}

impl Window {
    /// Whether a row with `watermark` belongs to this window of `slice`.
    pub fn contains(&self, slice: &Slice, watermark: Watermark) -> bool {
        slice.contains(watermark)
            && watermark >= self.start
            && self.end.map_or(true, |end| watermark < end)
    }

    pub fn is_last(&self) -> bool {
        self.end.is_none()
    }
}

/// All windows of one slice, computed up front from the sampled boundaries.
///
/// Because the list is materialised, a retry or a cancelled run has a
/// well-defined resumption point at any window index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPlan {
    pub windows: Vec<Window>,
    /// `boundaries * chunk_size`; accurate for evenly spread rows, may overcount
    pub rowcount_estimate: u64,
}

impl WindowPlan {
    /// Build windows from the sampled boundary watermarks.
    ///
    /// Rows sharing a watermark value always land in the same window, so
    /// repeated boundary values are collapsed. A window may therefore hold
    /// more than `chunk_size` rows when many rows share one value.
    pub fn from_boundaries(mut boundaries: Vec<Watermark>, chunk_size: usize) -> Self {
        let sampled = boundaries.len() as u64;
        boundaries.sort_unstable();
        boundaries.dedup();

        let windows = boundaries
            .iter()
            .enumerate()
            .map(|(index, start)| Window {
                index,
                start: *start,
                end: boundaries.get(index + 1).copied(),
            })
            .collect();

        Self {
            windows,
            rowcount_estimate: sampled * chunk_size as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Window> {
        self.windows.iter()
    }
}

impl<'a> IntoIterator for &'a WindowPlan {
    type Item = &'a Window;
    type IntoIter = std::slice::Iter<'a, Window>;

    fn into_iter(self) -> Self::IntoIter {
        self.windows.iter()
    }
}

/// Produces the window plan of a slice with one lightweight boundary scan.
pub struct WindowedCursor<'a, S: ?Sized> {
    source: &'a S,
    chunk_size: usize,
}

impl<'a, S: SourceTable + ?Sized> WindowedCursor<'a, S> {
    /// `chunk_size` of zero is treated as one.
    pub fn new(source: &'a S, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn windows(&self, table: &TableDescriptor, slice: &Slice) -> Result<WindowPlan> {
        let boundaries = self
            .source
            .window_boundaries(table, slice, self.chunk_size)
            .await?;

        let plan = WindowPlan::from_boundaries(boundaries, self.chunk_size);
        tracing::debug!(
            "Slice {} of {} split into {} windows (~{} rows)",
            slice.index,
            table.display_name(),
            plan.len(),
            plan.rowcount_estimate
        );
        Ok(plan)
    }
}
