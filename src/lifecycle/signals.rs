//! OS signal handling.

use crate::lifecycle::shutdown::Shutdown;

/// Wait for Ctrl-C (SIGINT) and trigger shutdown.
pub async fn trigger_on_ctrl_c(shutdown: &Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
        Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt signal"),
    }
}
