// ABOUTME: PostgreSQL source table - watermark bounds, planner estimates, window boundaries and row fetches
// ABOUTME: Rows are read with every column cast to text

use async_trait::async_trait;
use tokio_postgres::types::ToSql;

use crate::config::{IntegerClock, ReplicationConfig};
use crate::engine::backend::{RowValues, SourceTable};
use crate::engine::cursor::Window;
use crate::engine::descriptor::TableDescriptor;
use crate::engine::planner::Slice;
use crate::engine::watermark::{Watermark, WatermarkKind};
use crate::error::{ReplicationError, Result};
use crate::postgres::connection::PgConnection;
use crate::postgres::{catalog, sql};

/// The table being replicated, read from the source database.
pub struct PgSource {
    conn: PgConnection,
    schema: String,
    table: String,
    watermark_column: String,
    integer_clock: IntegerClock,
}

impl PgSource {
    pub async fn connect(config: &ReplicationConfig) -> Result<Self> {
        let conn = PgConnection::connect(config, &config.source_db).await?;
        Ok(Self::new(conn, config))
    }

    pub fn new(conn: PgConnection, config: &ReplicationConfig) -> Self {
        Self {
            conn,
            schema: config.schema.clone(),
            table: config.table.clone(),
            watermark_column: config.watermark_column.clone(),
            integer_clock: config.integer_clock,
        }
    }

    async fn query_watermark(
        &self,
        table: &TableDescriptor,
        query: &str,
    ) -> Result<Option<Watermark>> {
        let row = self
            .conn
            .client()?
            .query_one(query, &[])
            .await
            .map_err(|e| ReplicationError::from_query(&table.display_name(), e))?;
        Ok(row.get::<_, Option<i64>>(0).map(Watermark))
    }
}

/// Extract `Plan Rows` from `EXPLAIN (FORMAT JSON)` output.
pub fn parse_plan_rows(plan: &serde_json::Value) -> Result<u64> {
    let rows = plan
        .get(0)
        .and_then(|p| p.get("Plan"))
        .and_then(|p| p.get("Plan Rows"))
        .and_then(|r| r.as_f64())
        .ok_or_else(|| {
            ReplicationError::Estimation(format!(
                "no 'Plan Rows' in planner output: {}",
                plan
            ))
        })?;

    if !rows.is_finite() || rows < 0.0 {
        return Err(ReplicationError::Estimation(format!(
            "planner returned an invalid row count: {}",
            rows
        )));
    }
    Ok(rows.round() as u64)
}

#[async_trait]
impl SourceTable for PgSource {
    async fn describe(&self) -> Result<TableDescriptor> {
        catalog::describe_table(
            self.conn.client()?,
            "source",
            &self.schema,
            &self.table,
            &self.watermark_column,
        )
        .await
    }

    async fn min_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        self.query_watermark(table, &sql::watermark_aggregate_query(table, "MIN"))
            .await
    }

    async fn max_watermark(&self, table: &TableDescriptor) -> Result<Option<Watermark>> {
        self.query_watermark(table, &sql::watermark_aggregate_query(table, "MAX"))
            .await
    }

    async fn run_start(&self, table: &TableDescriptor) -> Result<Watermark> {
        match (table.watermark_kind, self.integer_clock) {
            (WatermarkKind::Integer, IntegerClock::SourceMax) => {
                // One past the current maximum, so rows at the maximum itself
                // fall inside the closed span.
                let max = self.max_watermark(table).await?.unwrap_or(Watermark(0));
                Ok(Watermark(max.0.saturating_add(1)))
            }
            (WatermarkKind::Integer, IntegerClock::EpochMillis) => {
                Ok(Watermark(chrono::Utc::now().timestamp_millis()))
            }
            (kind, _) => {
                let query = sql::server_clock_query(kind).ok_or_else(|| {
                    ReplicationError::InvalidState(format!("no server clock for {:?}", kind))
                })?;
                self.query_watermark(table, &query).await?.ok_or_else(|| {
                    ReplicationError::InvalidState("source clock returned NULL".to_string())
                })
            }
        }
    }

    async fn estimate_rows(
        &self,
        table: &TableDescriptor,
        lower: Watermark,
        upper: Watermark,
    ) -> Result<u64> {
        let query = sql::explain_query(table, lower, upper);
        let row = self
            .conn
            .client()?
            .query_one(&query, &[])
            .await
            .map_err(|e| ReplicationError::from_query(&table.display_name(), e))?;

        // The plan arrives as `json`; fall back to text for older servers.
        let plan = match row.try_get::<_, serde_json::Value>(0) {
            Ok(value) => value,
            Err(_) => {
                let text: String = row.try_get(0).map_err(|e| {
                    ReplicationError::Estimation(format!("unreadable planner output: {}", e))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    ReplicationError::Estimation(format!("planner output is not JSON: {}", e))
                })?
            }
        };

        let estimate = parse_plan_rows(&plan)?;
        tracing::debug!(
            "Planner estimates {} rows for {} in [{}, {}]",
            estimate,
            table.display_name(),
            lower,
            upper
        );
        Ok(estimate)
    }

    async fn window_boundaries(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        chunk_size: usize,
    ) -> Result<Vec<Watermark>> {
        let query = sql::window_boundaries_query(table, chunk_size);
        let rows = self
            .conn
            .client()?
            .query(&query, &[&slice.lower.0, &slice.upper.0])
            .await
            .map_err(|e| ReplicationError::from_query(&table.display_name(), e))?;

        Ok(rows
            .iter()
            .map(|row| Watermark(row.get::<_, i64>(0)))
            .collect())
    }

    async fn fetch_window(
        &self,
        table: &TableDescriptor,
        slice: &Slice,
        window: &Window,
    ) -> Result<Vec<RowValues>> {
        let query = sql::fetch_window_query(table, window.end.is_some());

        let mut params: Vec<&(dyn ToSql + Sync)> =
            vec![&slice.lower.0, &slice.upper.0, &window.start.0];
        if let Some(end) = &window.end {
            params.push(&end.0);
        }

        let rows = self
            .conn
            .client()?
            .query(&query, &params)
            .await
            .map_err(|e| ReplicationError::from_query(&table.display_name(), e))?;

        let width = table.columns.len();
        Ok(rows
            .iter()
            .map(|row| (0..width).map(|i| row.get::<_, Option<String>>(i)).collect())
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.close().await
    }
}
