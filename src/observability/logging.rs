//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Let `RUST_LOG` override the configured level
//! - Keep stdout free for command output
//!
//! Audit records are emitted through the same subscriber under the `audit`
//! target (see `credentials::audit::TracingAuditSink`), so they can be
//! routed separately with a filter such as `audit=info`.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor the config sets one.
pub fn default_filter(level: &str) -> String {
    format!("resilient_translator={level},audit=info")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
}
