// ABOUTME: Replication session - owns both connections and drives the run state machine
// ABOUTME: INIT -> VALIDATED -> WATERMARK_RESOLVED -> PLANNED -> RUNNING -> DONE, FAILED from any state

use std::fmt;
use std::time::Instant;

use futures::Stream;
use tokio::sync::watch;

use super::backend::{DestinationTable, SourceTable};
use super::cursor::{WindowPlan, WindowedCursor};
use super::descriptor::TableDescriptor;
use super::merge::MergeEngine;
use super::planner::{CardinalityEstimator, SlicePlan, SlicePlanner};
use super::progress::{ProgressRecord, RunSummary};
use super::watermark::{ResolvedWatermark, Watermark, WatermarkOrigin, WatermarkResolver};
use crate::config::EngineOptions;
use crate::error::{ReplicationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Validated,
    WatermarkResolved,
    Planned,
    Running,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Validated => "VALIDATED",
            SessionState::WatermarkResolved => "WATERMARK_RESOLVED",
            SessionState::Planned => "PLANNED",
            SessionState::Running => "RUNNING",
            SessionState::Done => "DONE",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One replication run of one table.
///
/// The session exclusively owns the source and destination handles for its
/// lifetime. Work is strictly sequential: one slice at a time, one window at
/// a time, each window's fetch and upsert finishing before the next starts.
pub struct Session<S, D> {
    source: S,
    destination: D,
    options: EngineOptions,
    state: SessionState,
    table: Option<TableDescriptor>,
    watermark: Option<ResolvedWatermark>,
    run_start: Option<Watermark>,
    plan: SlicePlan,
    slice_pos: usize,
    windows: Option<WindowPlan>,
    window_pos: usize,
    processed_in_slice: u64,
    processed_total: u64,
    windows_committed: u64,
    started: Instant,
    closed: bool,
}

impl<S, D> Session<S, D>
where
    S: SourceTable,
    D: DestinationTable,
{
    /// Wrap two open connections. The session starts in `INIT`.
    pub fn new(source: S, destination: D, options: EngineOptions) -> Self {
        Self {
            source,
            destination,
            options,
            state: SessionState::Init,
            table: None,
            watermark: None,
            run_start: None,
            plan: SlicePlan::default(),
            slice_pos: 0,
            windows: None,
            window_pos: 0,
            processed_in_slice: 0,
            processed_total: 0,
            windows_committed: 0,
            started: Instant::now(),
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table(&self) -> Option<&TableDescriptor> {
        self.table.as_ref()
    }

    pub fn watermark(&self) -> Option<ResolvedWatermark> {
        self.watermark
    }

    pub fn plan(&self) -> &SlicePlan {
        &self.plan
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// `INIT -> VALIDATED`: reflect the source table and make sure the
    /// destination exists with the same structure.
    pub async fn validate(&mut self) -> Result<&TableDescriptor> {
        self.expect_state(SessionState::Init, "validate")?;
        let result = self.validate_inner().await;
        self.track(result)?;
        self.table
            .as_ref()
            .ok_or_else(|| ReplicationError::InvalidState("no table descriptor".to_string()))
    }

    async fn validate_inner(&mut self) -> Result<()> {
        let table = self.source.describe().await?;
        let destination = self.destination.prepare(&table).await?;
        table.ensure_matches(&destination)?;

        tracing::info!(
            "Validated {} ({} columns, primary key: {}, watermark: {})",
            table.display_name(),
            table.columns.len(),
            table.primary_key.join(", "),
            table.watermark_column
        );

        self.table = Some(table);
        self.state = SessionState::Validated;
        Ok(())
    }

    /// `VALIDATED -> WATERMARK_RESOLVED`.
    pub async fn resolve_watermark(&mut self) -> Result<Option<ResolvedWatermark>> {
        self.expect_state(SessionState::Validated, "resolve the watermark")?;
        let result = self.resolve_inner().await;
        self.track(result)
    }

    async fn resolve_inner(&mut self) -> Result<Option<ResolvedWatermark>> {
        let table = self.table_ref()?;
        let resolved = WatermarkResolver::new(&self.source, &self.destination)
            .resolve(table)
            .await?;

        self.watermark = resolved;
        self.state = SessionState::WatermarkResolved;
        Ok(resolved)
    }

    /// `WATERMARK_RESOLVED -> PLANNED`, capturing the run start bound now.
    pub async fn plan_slices(&mut self) -> Result<&SlicePlan> {
        self.expect_state(SessionState::WatermarkResolved, "plan slices")?;
        let result = self.plan_inner().await;
        self.track(result)?;
        Ok(&self.plan)
    }

    async fn plan_inner(&mut self) -> Result<()> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| ReplicationError::InvalidState("no table descriptor".to_string()))?;

        let plan = match self.watermark {
            None => {
                tracing::info!(
                    "Source and destination {} are both empty, nothing to replicate",
                    table.display_name()
                );
                SlicePlan::default()
            }
            Some(resolved) => {
                let source_max = self.source.max_watermark(table).await?;
                let caught_up = match (source_max, resolved.origin) {
                    (None, _) => true,
                    (Some(max), WatermarkOrigin::Destination) => resolved.value >= max,
                    (Some(_), WatermarkOrigin::SourceMinimum) => false,
                };

                if caught_up {
                    tracing::info!(
                        "Destination {} is up to date at watermark {}",
                        table.display_name(),
                        table.watermark_kind.render(resolved.value)
                    );
                    SlicePlan::default()
                } else {
                    let run_start = self.source.run_start(table).await?;
                    self.run_start = Some(run_start);

                    let planner = SlicePlanner::new(self.options.slice_ceiling);
                    let estimator = CardinalityEstimator::new(&self.source);
                    let plan = planner
                        .plan(&estimator, table, resolved.value, run_start)
                        .await?;

                    tracing::info!(
                        "Planned {} slices for {} over [{}, {}], ~{} rows",
                        plan.len(),
                        table.display_name(),
                        table.watermark_kind.render(resolved.value),
                        table.watermark_kind.render(run_start),
                        plan.total_estimate
                    );
                    plan
                }
            }
        };

        self.plan = plan;
        self.state = SessionState::Planned;
        Ok(())
    }

    /// Run whatever preparation steps remain, up to `PLANNED`.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.state == SessionState::Init {
            self.validate().await?;
        }
        if self.state == SessionState::Validated {
            self.resolve_watermark().await?;
        }
        if self.state == SessionState::WatermarkResolved {
            self.plan_slices().await?;
        }
        Ok(())
    }

    /// Merge the next window and report progress.
    ///
    /// This is the lazy form of the run: every call commits exactly one
    /// window and returns its progress record, `None` once the run is done.
    /// Stopping between calls leaves the destination consistent with the
    /// windows committed so far.
    pub async fn next_progress(&mut self) -> Result<Option<ProgressRecord>> {
        match self.state {
            SessionState::Failed => {
                return Err(ReplicationError::InvalidState(
                    "session failed earlier; start a new run".to_string(),
                ))
            }
            SessionState::Done => return Ok(None),
            SessionState::Init | SessionState::Validated | SessionState::WatermarkResolved => {
                self.prepare().await?;
            }
            SessionState::Planned | SessionState::Running => {}
        }

        if self.state == SessionState::Planned {
            self.state = SessionState::Running;
        }

        let result = self.step().await;
        self.track(result)
    }

    async fn step(&mut self) -> Result<Option<ProgressRecord>> {
        loop {
            let Some(slice) = self.plan.slices.get(self.slice_pos).copied() else {
                self.state = SessionState::Done;
                if let Some(table) = self.table.as_ref() {
                    tracing::info!(
                        "Replication of {} done: {} rows in {} windows",
                        table.display_name(),
                        self.processed_total,
                        self.windows_committed
                    );
                }
                return Ok(None);
            };

            let table = self
                .table
                .as_ref()
                .ok_or_else(|| ReplicationError::InvalidState("no table descriptor".to_string()))?;

            if self.windows.is_none() {
                tracing::info!(
                    "Starting slice {}/{} of {}: [{}, {}], ~{} rows",
                    slice.index + 1,
                    self.plan.len(),
                    table.display_name(),
                    table.watermark_kind.render(slice.lower),
                    table.watermark_kind.render(slice.upper),
                    slice.estimated_rows
                );
                let plan = WindowedCursor::new(&self.source, self.options.chunk_size)
                    .windows(table, &slice)
                    .await?;
                self.windows = Some(plan);
                self.window_pos = 0;
                self.processed_in_slice = 0;
            }

            let Some((window, rows_estimated_in_slice)) = self.windows.as_ref().and_then(|plan| {
                plan.windows
                    .get(self.window_pos)
                    .copied()
                    .map(|w| (w, plan.rowcount_estimate))
            }) else {
                self.slice_pos += 1;
                self.windows = None;
                continue;
            };

            let applied = MergeEngine::new(&self.source, &mut self.destination)
                .merge_window(table, &slice, &window)
                .await?;

            self.window_pos += 1;
            self.windows_committed += 1;
            self.processed_in_slice += applied;
            self.processed_total += applied;

            return Ok(Some(ProgressRecord {
                rows_processed_in_slice: self.processed_in_slice,
                rows_estimated_in_slice,
                rows_estimated_in_table: self.plan.total_estimate,
                slice_index: slice.index,
                slice_count: self.plan.len(),
                rows_processed_total: self.processed_total,
            }));
        }
    }

    /// Drive the run to completion, calling `on_progress` after every
    /// committed window.
    ///
    /// `stop` is checked between windows only, never during an upsert; when
    /// it reads `true` the run ends with [`ReplicationError::Cancelled`].
    pub async fn run<F>(
        &mut self,
        stop: &watch::Receiver<bool>,
        mut on_progress: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(ProgressRecord),
    {
        loop {
            if *stop.borrow() {
                tracing::info!(
                    "Stop requested, ending run after {} committed windows",
                    self.windows_committed
                );
                self.state = SessionState::Failed;
                return Err(ReplicationError::Cancelled {
                    windows: self.windows_committed,
                });
            }

            match self.next_progress().await? {
                Some(record) => on_progress(record),
                None => return Ok(self.summary()),
            }
        }
    }

    /// Summary of the work done so far.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            slices: self.plan.len(),
            windows: self.windows_committed,
            rows_applied: self.processed_total,
            watermark_start: self.watermark.map(|w| w.value),
            watermark_end: self.run_start,
            duration: self.started.elapsed(),
        }
    }

    /// Release both connections. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let source = self.source.close().await;
        let destination = self.destination.close().await;
        tracing::debug!("Session connections released");
        source.and(destination)
    }

    /// Stream of progress records, one per committed window.
    ///
    /// The stream borrows the session and ends after the last window or the
    /// first error. It never releases connections itself: the caller closes
    /// the session with [`Session::close`] once the stream is done or dropped.
    pub fn progress_stream(&mut self) -> impl Stream<Item = Result<ProgressRecord>> + '_ {
        futures::stream::unfold(Some(self), |state| async move {
            let session = state?;
            match session.next_progress().await {
                Ok(Some(record)) => Some((Ok(record), Some(session))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn table_ref(&self) -> Result<&TableDescriptor> {
        self.table
            .as_ref()
            .ok_or_else(|| ReplicationError::InvalidState("no table descriptor".to_string()))
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(ReplicationError::InvalidState(format!(
                "cannot {} in state {} (expected {})",
                action, self.state, expected
            )));
        }
        Ok(())
    }

    /// Move to `FAILED` on error.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!(
                "Replication failed in state {} ({}): {}",
                self.state,
                e.kind(),
                e
            );
            self.state = SessionState::Failed;
        }
        result
    }
}

/// Run one complete replication and always release both connections,
/// whether the run completes, fails or is cancelled.
pub async fn replicate<S, D, F>(
    source: S,
    destination: D,
    options: EngineOptions,
    stop: &watch::Receiver<bool>,
    on_progress: F,
) -> Result<RunSummary>
where
    S: SourceTable,
    D: DestinationTable,
    F: FnMut(ProgressRecord),
{
    options.validate()?;

    let mut session = Session::new(source, destination, options);
    let result = session.run(stop, on_progress).await;
    let closed = session.close().await;

    match (result, closed) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                tracing::warn!("Failed to release connections: {}", close_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::descriptor::ColumnDescriptor;
    use crate::engine::memory::MemoryTable;

    fn table() -> TableDescriptor {
        TableDescriptor::new(
            "public",
            "items",
            vec![
                ColumnDescriptor::new("id", "bigint", true),
                ColumnDescriptor::new("updated", "bigint", true),
            ],
            vec!["id".to_string()],
            "updated",
        )
        .unwrap()
    }

    fn source_with(marks: &[i64]) -> MemoryTable {
        let source = MemoryTable::new(table());
        for (id, mark) in marks.iter().enumerate() {
            source
                .insert(vec![Some(id.to_string()), Some(mark.to_string())])
                .unwrap();
        }
        source
    }

    fn options() -> EngineOptions {
        EngineOptions {
            chunk_size: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transitions_in_order() {
        let mut session = Session::new(
            source_with(&[1, 2, 3]),
            MemoryTable::new(table()),
            options(),
        );
        assert_eq!(session.state(), SessionState::Init);

        session.validate().await.unwrap();
        assert_eq!(session.state(), SessionState::Validated);

        session.resolve_watermark().await.unwrap();
        assert_eq!(session.state(), SessionState::WatermarkResolved);

        session.plan_slices().await.unwrap();
        assert_eq!(session.state(), SessionState::Planned);

        assert!(session.next_progress().await.unwrap().is_some());
        assert_eq!(session.state(), SessionState::Running);

        while session.next_progress().await.unwrap().is_some() {}
        assert_eq!(session.state(), SessionState::Done);
        assert!(session.next_progress().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_step_is_rejected() {
        let mut session =
            Session::new(source_with(&[1]), MemoryTable::new(table()), options());
        let err = session.plan_slices().await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
        assert_eq!(session.state(), SessionState::Init);
    }

    #[tokio::test]
    async fn test_single_valued_source_is_copied() {
        let destination = MemoryTable::new(table());
        let mut session =
            Session::new(source_with(&[5, 5, 5]), destination.clone(), options());

        let (_tx, stop) = watch::channel(false);
        let summary = session.run(&stop, |_| {}).await.unwrap();
        assert_eq!(summary.rows_applied, 3);
        assert_eq!(summary.windows, 1);
        assert_eq!(destination.len(), 3);
    }

    #[tokio::test]
    async fn test_caught_up_destination_plans_nothing() {
        let destination = source_with(&[1, 2, 3]);
        let mut session = Session::new(source_with(&[1, 2, 3]), destination, options());

        session.prepare().await.unwrap();
        assert!(session.plan().is_empty());
        assert_eq!(session.summary().watermark_end, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let source = source_with(&[1]);
        let destination = MemoryTable::new(table());
        let mut session = Session::new(source.clone(), destination.clone(), options());

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(source.is_closed());
        assert!(destination.is_closed());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(
            SessionState::WatermarkResolved.to_string(),
            "WATERMARK_RESOLVED"
        );
        assert_eq!(SessionState::Failed.to_string(), "FAILED");
    }
}
