//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to each subsystem constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Secrets are read from the environment, never from the config file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, CacheConfig, CircuitBreakerConfig, ClientConfig, CredentialsConfig,
    NetworkConfig, ObservabilityConfig, RateLimitConfig, RetryConfig, TimeoutConfig,
};
