//! Network quality subsystem.
//!
//! # Data Flow
//! ```text
//! probe.rs (HTTP GET, timed)
//!     → quality.rs classify() → NetworkTier
//!     → current() for point reads (breaker, timeouts, fallback policy)
//!     → Subscription::changed() for tier transitions
//! ```

pub mod probe;
pub mod quality;

pub use probe::{HttpProbe, Probe, ProbeSample};
pub use quality::{classify, NetworkCondition, NetworkQualityMonitor, NetworkTier, Subscription};
