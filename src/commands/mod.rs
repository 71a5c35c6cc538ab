// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports single, continuous, and the shared stop signal and progress rendering

pub mod continuous;
pub mod progress;
pub mod single;

pub use continuous::{continuous, ContinuousStats};
pub use progress::ProgressReporter;
pub use single::single;

use tokio::sync::watch;

/// Stop signal raised on Ctrl+C. The engine checks it between windows.
pub fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal, stopping after the current window");
                let _ = stop_tx.send(true);
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
    stop_rx
}
