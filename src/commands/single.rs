// ABOUTME: Single-run command - replicates everything up to the run start, then exits
// ABOUTME: Connections are released whether the run completes, fails or is cancelled

use anyhow::Context;
use tokio::sync::watch;

use super::progress::ProgressReporter;
use crate::config::ReplicationConfig;
use crate::engine::progress::RunSummary;
use crate::engine::session::replicate;
use crate::postgres;

/// Run one replication of the configured table.
pub async fn single(
    config: &ReplicationConfig,
    stop: &watch::Receiver<bool>,
) -> anyhow::Result<RunSummary> {
    let (source, destination) = postgres::connect(config)
        .await
        .context("Failed to open source and destination connections")?;

    let mut reporter = ProgressReporter::new();
    let result = replicate(
        source,
        destination,
        config.engine_options(),
        stop,
        |record| reporter.update(&record),
    )
    .await;

    match result {
        Ok(summary) => {
            reporter.finish(&summary);
            tracing::info!(
                "Synced {} rows of {}.{} in {:.1}s",
                summary.rows_applied,
                config.schema,
                config.table,
                summary.duration.as_secs_f64()
            );
            Ok(summary)
        }
        Err(e) => {
            reporter.abandon();
            Err(e).with_context(|| format!("Replication of {}.{} failed", config.schema, config.table))
        }
    }
}
