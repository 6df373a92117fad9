//! Resilient, security-hardened client for a translation and text-to-speech
//! backend.
//!
//! # Architecture Overview
//!
//! ```text
//!   translate / synthesize
//!          │
//!          ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ client::api  ResilientApiClient                               │
//!   │   validate → policy → rate limit → retry → breaker → timeout │
//!   └──────┬───────────────┬──────────────────┬────────────────────┘
//!          │               │                  │
//!          ▼               ▼                  ▼
//!   ┌────────────┐  ┌─────────────┐   ┌───────────────┐
//!   │credentials │  │  security   │   │    cache      │
//!   │store/rotate│  │sanitize/rate│   │offline policy │
//!   └────────────┘  └─────────────┘   └───────────────┘
//!          │
//!          ▼
//!   client::backend (HTTP) ◀── network::quality (tier, subscriptions)
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod credentials;
pub mod lifecycle;
pub mod network;
pub mod observability;
pub mod resilience;
pub mod security;

pub use client::{ClientError, ClientResult, ResilientApiClient};
pub use config::schema::ClientConfig;
pub use lifecycle::Shutdown;
