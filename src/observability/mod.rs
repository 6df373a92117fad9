//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! client, credentials, resilience, network
//!     → logging.rs (tracing subscriber; credential audit under the `audit` target)
//!     → metrics.rs (request outcomes, breaker state, limiter and cache counters)
//!
//! Consumers:
//!     → stderr via the fmt layer
//!     → Prometheus scrape endpoint (only when `metrics_enabled`)
//! ```
//!
//! # Design Decisions
//! - Secrets never appear as fields; requests are logged in sanitized form
//! - Metric labels are static strings or endpoint names, never user text

pub mod logging;
pub mod metrics;
