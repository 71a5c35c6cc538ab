// ABOUTME: Continuous command - repeats single runs with a delay in between
// ABOUTME: A failed run is logged and retried next round; a stop signal ends the loop

use std::time::Duration;
use tokio::sync::watch;

use super::single::single;
use crate::config::ReplicationConfig;
use crate::error::ReplicationError;

/// Totals across all rounds of a continuous session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuousStats {
    pub rounds: u64,
    pub failed_rounds: u64,
    pub rows_applied: u64,
}

/// Keep the destination in sync until `stop` is raised.
///
/// Each round is a complete, independent run. When a round fails the error
/// is logged and the next round starts after the usual delay.
pub async fn continuous(
    config: &ReplicationConfig,
    delay: Duration,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<ContinuousStats> {
    let mut stats = ContinuousStats::default();

    loop {
        if *stop.borrow() {
            break;
        }

        stats.rounds += 1;
        tracing::info!("Starting round {}", stats.rounds);

        match single(config, &stop).await {
            Ok(summary) => stats.rows_applied += summary.rows_applied,
            Err(e) if is_cancelled(&e) => {
                tracing::info!("Stopped during round {}", stats.rounds);
                break;
            }
            Err(e) => {
                stats.failed_rounds += 1;
                tracing::error!("Round {} failed: {:#}", stats.rounds, e);
            }
        }

        tracing::debug!("Waiting {}s before the next round", delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                // Sender dropped: nobody can stop us any more, keep going.
                if changed.is_err() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    tracing::info!(
        "Continuous replication stopped after {} rounds ({} failed), {} rows synced",
        stats.rounds,
        stats.failed_rounds,
        stats.rows_applied
    );
    Ok(stats)
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ReplicationError>()
            .is_some_and(ReplicationError::is_cancelled)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cancellation_is_detected_through_context() {
        let err: anyhow::Result<()> = Err(ReplicationError::Cancelled { windows: 2 })
            .context("Replication of public.orders failed");
        assert!(is_cancelled(&err.unwrap_err()));

        let err = anyhow::Error::new(ReplicationError::schema("missing"));
        assert!(!is_cancelled(&err));
    }

    #[tokio::test]
    async fn test_raised_stop_ends_before_first_round() {
        let (_tx, rx) = watch::channel(true);
        let config = ReplicationConfig::default();
        let stats = continuous(&config, Duration::from_millis(1), rx)
            .await
            .unwrap();
        assert_eq!(stats, ContinuousStats::default());
    }
}
