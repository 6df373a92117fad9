//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → sanitizer.rs (redacted copy for logs and audit; real request untouched)
//!     → rate_limit.rs (admit, queue by priority, or reject)
//!     → Pass to resilience
//! ```
//!
//! # Design Decisions
//! - Redaction is pure and idempotent
//! - Over-redaction is a defect: only names, known shapes and mixed
//!   letter/digit tokens are replaced
//! - Rate limit state is scoped per endpoint

pub mod rate_limit;
pub mod sanitizer;

pub use rate_limit::{Acquire, Admission, Priority, RateLimiter};
pub use sanitizer::{sanitize, RequestRepr, REDACTED};
