//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (fail fast while the endpoint is open)
//!     → timeouts.rs (deadline from network tier + observed latency)
//!     → On transient failure: retries.rs (backoff.rs delay, or Retry-After)
//!     → Outcome recorded on the breaker
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend attempt has a deadline
//! - Only transient errors are retried
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState};
pub use retries::{RetryAttempt, RetryCoordinator, RetryPolicy};
pub use timeouts::{AdaptiveTimeoutManager, TierTimeouts};
