// ABOUTME: In-memory table implementing both sides of a replication run
// ABOUTME: Used for dry runs and for exercising the engine without a database

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{DestinationTable, RowValues, SourceTable};
use super::cursor::Window;
use super::descriptor::TableDescriptor;
use super::planner::Slice;
use super::watermark::Watermark;
use crate::error::{ReplicationError, Result};

#[derive(Debug, Default)]
struct Inner {
    descriptor: Option<TableDescriptor>,
    /// Rows keyed by their primary-key values
    rows: BTreeMap<Vec<Option<String>>, RowValues>,
    run_start: Option<Watermark>,
    estimate: Option<u64>,
    fail_after_upserts: Option<u64>,
    upserts: u64,
    closed: bool,
}

/// A table held in memory. Watermark values are stored as their integer
/// domain value (see [`Watermark`]).
///
/// Clones share the same storage, so a test can hand one clone to a session
/// and inspect the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTable {
    /// An existing, empty table with the given structure.
    pub fn new(descriptor: TableDescriptor) -> Self {
        let inner = Inner {
            descriptor: Some(descriptor),
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// A table that does not exist yet; as a destination it is created from
    /// the source structure.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Pin the run start bound instead of deriving it from the data.
    pub fn with_run_start(self, run_start: Watermark) -> Self {
        self.lock().run_start = Some(run_start);
        self
    }

    /// Report this fixed row estimate instead of counting.
    pub fn with_estimate(self, estimate: u64) -> Self {
        self.lock().estimate = Some(estimate);
        self
    }

    /// Fail every upsert after the first `upserts` succeeded.
    pub fn fail_after_upserts(self, upserts: u64) -> Self {
        self.lock().fail_after_upserts = Some(upserts);
        self
    }

    /// Let upserts succeed again after [`MemoryTable::fail_after_upserts`].
    pub fn clear_failure(&self) {
        self.lock().fail_after_upserts = None;
    }

    /// Insert or replace a row, keyed by its primary key.
    pub fn insert(&self, row: RowValues) -> Result<()> {
        let mut inner = self.lock();
        let descriptor = inner.descriptor.clone().ok_or_else(missing_table)?;
        let key = primary_key_of(&descriptor, &row)?;
        inner.rows.insert(key, row);
        Ok(())
    }

    /// All rows, ordered by primary key.
    pub fn rows(&self) -> Vec<RowValues> {
        self.lock().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    pub fn descriptor(&self) -> Option<TableDescriptor> {
        self.lock().descriptor.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of successful upserts so far.
    pub fn upsert_count(&self) -> u64 {
        self.lock().upserts
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn watermarks(&self, table: &TableDescriptor) -> Vec<Watermark> {
        let index = table.watermark_index();
        let mut marks: Vec<Watermark> = self
            .lock()
            .rows
            .values()
            .filter_map(|row| watermark_of(row, index))
            .collect();
        marks.sort_unstable();
        marks
    }
}

fn missing_table() -> ReplicationError {
    ReplicationError::schema("table does not exist in memory store")
}

fn watermark_of(row: &RowValues, index: usize) -> Option<Watermark> {
    row.get(index)?
        .as_deref()?
        .parse::<i64>()
        .ok()
        .map(Watermark)
}

fn primary_key_of(table: &TableDescriptor, row: &RowValues) -> Result<Vec<Option<String>>> {
    if row.len() != table.columns.len() {
        return Err(ReplicationError::upsert(
            table.display_name(),
            format!(
                "row has {} values, table has {} columns",
                row.len(),
                table.columns.len()
            ),
        ));
    }

    table
        .primary_key_indices()
        .into_iter()
        .map(|i| match &row[i] {
            Some(value) => Ok(Some(value.clone())),
            None => Err(ReplicationError::upsert(
                table.display_name(),
                format!(
                    "null value in primary key column '{}'",
                    table.columns[i].name
                ),
            )),
        })
        .collect()
}

#[async_trait]
impl SourceTable for MemoryTable {
    async fn describe(&self) -> Result<TableDescriptor> {
        self.descriptor().ok_or_else(missing_table)
    }

    async fn min_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        Ok(self.watermarks(table).first().copied())
    }

    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        Ok(self.watermarks(table).last().copied())
    }

    async fn run_start(&self, table: &TableDescriptor) -> Result<Watermark> {
        if let Some(run_start) = self.lock().run_start {
            return Ok(run_start);
        }
        let max = self.watermarks(table).last().copied().unwrap_or(Watermark(0));
        Ok(Watermark(max.0.saturating_add(1)))
    }

    async fn estimate_rows(
        &self,
        table: &TableDescriptor,
        lower: Watermark,
        upper: Watermark,
    ) -> Result<u64> {
        if let Some(estimate) = self.lock().estimate {
            return Ok(estimate);
        }
        Ok(self
            .watermarks(table)
            .into_iter()
            .filter(|w| lower <= *w && *w <= upper)
            .count() as u64)
    }

    async fn window_boundaries(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        chunk_size: usize,
    ) -> Result<Vec<Watermark>> {
        let chunk_size = chunk_size.max(1);
        Ok(self
            .watermarks(table)
            .into_iter()
            .filter(|w| slice.contains(*w))
            .enumerate()
            .filter(|(i, _)| i % chunk_size == 0)
            .map(|(_, w)| w)
            .collect())
    }

    async fn fetch_window(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        window: &Window,
    ) -> Result<Vec<RowValues>> {
        let index = table.watermark_index();
        let mut rows: Vec<(Watermark, RowValues)> = self
            .lock()
            .rows
            .values()
            .filter_map(|row| {
                let mark = watermark_of(row, index)?;
                window.contains(slice, mark).then(|| (mark, row.clone()))
            })
            .collect();
        rows.sort_by_key(|(mark, _)| *mark);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[async_trait]
impl DestinationTable for MemoryTable {
    async fn prepare(&mut self, source: &TableDescriptor) -> Result<TableDescriptor> {
        let mut inner = self.lock();
        match &inner.descriptor {
            Some(existing) => Ok(existing.clone()),
            None => {
                tracing::info!("Creating in-memory table {}", source.display_name());
                inner.descriptor = Some(source.clone());
                Ok(source.clone())
            }
        }
    }

    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        Ok(self.watermarks(table).last().copied())
    }

    async fn upsert(&mut self, table: &TableDescriptor, rows: &[RowValues]) -> Result<u64> {
        let mut inner = self.lock();
        if inner.descriptor.is_none() {
            return Err(missing_table());
        }
        if let Some(limit) = inner.fail_after_upserts {
            if inner.upserts >= limit {
                return Err(ReplicationError::Connectivity(format!(
                    "in-memory destination unavailable after {} upserts",
                    limit
                )));
            }
        }

        // Validate every row first so the batch applies all-or-nothing.
        let keyed = rows
            .iter()
            .map(|row| Ok((primary_key_of(table, row)?, row.clone())))
            .collect::<Result<Vec<_>>>()?;

        for (key, row) in keyed {
            inner.rows.insert(key, row);
        }
        inner.upserts += 1;
        Ok(rows.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::descriptor::ColumnDescriptor;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new(
            "public",
            "events",
            vec![
                ColumnDescriptor::new("id", "bigint", true),
                ColumnDescriptor::new("updated", "bigint", true),
                ColumnDescriptor::new("payload", "text", false),
            ],
            vec!["id".to_string()],
            "updated",
        )
        .unwrap()
    }

    fn row(id: i64, updated: i64, payload: &str) -> RowValues {
        vec![
            Some(id.to_string()),
            Some(updated.to_string()),
            Some(payload.to_string()),
        ]
    }

    #[tokio::test]
    async fn test_upsert_overwrites_non_key_columns() {
        let table = descriptor();
        let mut dest = MemoryTable::new(table.clone());

        dest.upsert(&table, &[row(1, 10, "old")]).await.unwrap();
        dest.upsert(&table, &[row(1, 20, "new")]).await.unwrap();

        assert_eq!(dest.rows(), vec![row(1, 20, "new")]);
        assert_eq!(
            DestinationTable::max_watermark(&dest, &table).await.unwrap(),
            Some(Watermark(20))
        );
    }

    #[tokio::test]
    async fn test_upsert_rejects_null_primary_key_atomically() {
        let table = descriptor();
        let mut dest = MemoryTable::new(table.clone());
        let bad = vec![None, Some("5".to_string()), None];

        let err = dest
            .upsert(&table, &[row(1, 1, "a"), bad])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upsert");
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn test_absent_destination_is_created_from_source() {
        let table = descriptor();
        let mut dest = MemoryTable::absent();
        assert!(dest.descriptor().is_none());

        let created = dest.prepare(&table).await.unwrap();
        assert_eq!(created, table);
        assert_eq!(dest.descriptor(), Some(table));
    }

    #[tokio::test]
    async fn test_boundaries_sample_every_chunk() {
        let table = descriptor();
        let source = MemoryTable::new(table.clone());
        for id in 1..=23 {
            source.insert(row(id, id, "x")).unwrap();
        }
        let slice = Slice {
            index: 0,
            lower: Watermark(1),
            upper: Watermark(23),
            estimated_rows: 23,
        };

        let boundaries = source.window_boundaries(&table, &slice, 10).await.unwrap();
        assert_eq!(boundaries, vec![Watermark(1), Watermark(11), Watermark(21)]);
        assert_eq!(source.run_start(&table).await.unwrap(), Watermark(24));
    }

    #[tokio::test]
    async fn test_fail_after_upserts() {
        let table = descriptor();
        let mut dest = MemoryTable::new(table.clone()).fail_after_upserts(1);

        assert!(dest.upsert(&table, &[row(1, 1, "a")]).await.is_ok());
        let err = dest.upsert(&table, &[row(2, 2, "b")]).await.unwrap_err();
        assert_eq!(err.kind(), "connectivity");
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.upsert_count(), 1);
    }
}
