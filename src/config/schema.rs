//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.
//! Secret material never appears here; only the name of the environment
//! variable that carries it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credentials::validation::KeyFormat;

/// Root configuration for the resilient client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Translation/TTS backend location.
    pub backend: BackendConfig,

    /// Credential provisioning and rotation.
    pub credentials: CredentialsConfig,

    /// Requests-per-minute limits.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Adaptive timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Network quality monitoring.
    pub network: NetworkConfig,

    /// Translation and audio caches.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g., "https://translate.example.com").
    pub base_url: String,

    /// Path of the translation endpoint.
    pub translate_path: String,

    /// Path of the speech synthesis endpoint.
    pub synthesize_path: String,

    /// Header carrying the credential.
    pub api_key_header: String,

    /// Maximum accepted input length in characters.
    pub max_text_chars: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            translate_path: "/v1/translate".to_string(),
            synthesize_path: "/v1/synthesize".to_string(),
            api_key_header: "X-Api-Key".to_string(),
            max_text_chars: 10_000,
        }
    }
}

/// Credential provisioning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable holding the API key at startup.
    pub secret_env_var: String,

    /// Service the provisioned key belongs to.
    pub service_id: String,

    /// Required key prefix, if the service has one.
    pub key_prefix: Option<String>,

    /// Minimum key length in bytes.
    pub min_key_length: usize,

    /// Dual-validity window after a rotation, in seconds.
    pub grace_period_secs: u64,

    /// Age after which a credential is due for rotation, in days.
    pub rotation_period_days: u64,
}

impl CredentialsConfig {
    pub fn key_format(&self) -> KeyFormat {
        KeyFormat::new(self.key_prefix.as_deref(), self.min_key_length)
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            secret_env_var: "TRANSLATOR_API_KEY".to_string(),
            service_id: "translator".to_string(),
            key_prefix: None,
            min_key_length: 8,
            grace_period_secs: 300,
            rotation_period_days: 90,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per window for endpoints without an override.
    pub requests_per_minute: u32,

    /// Per-endpoint overrides, keyed by endpoint name ("translate", "tts").
    pub endpoints: HashMap<String, u32>,

    /// Maximum queued requests per endpoint.
    pub queue_capacity: usize,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn limit_for(&self, endpoint: &str) -> u32 {
        self.endpoints
            .get(endpoint)
            .copied()
            .unwrap_or(self.requests_per_minute)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            endpoints: HashMap::new(),
            queue_capacity: 100,
            window_secs: 60,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Recovery timeout at "good" network quality, in seconds.
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Adaptive timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Response times remembered per operation.
    pub history_size: usize,

    /// Base timeouts per network tier, in milliseconds.
    pub excellent_ms: u64,
    pub good_ms: u64,
    pub poor_ms: u64,
    pub very_poor_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            excellent_ms: 2_000,
            good_ms: 5_000,
            poor_ms: 15_000,
            very_poor_ms: 30_000,
        }
    }
}

/// Network quality monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Enable the background monitor.
    pub enabled: bool,

    /// URL sampled for latency and throughput. Defaults to the backend.
    pub probe_url: Option<String>,

    /// Seconds between samples.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds; exceeding it counts as offline.
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_url: None,
            interval_secs: 15,
            probe_timeout_ms: 3_000,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached translations; `None` is unbounded.
    pub max_translations: Option<usize>,

    /// Maximum cached audio clips; `None` is unbounded.
    pub max_audio_clips: Option<usize>,

    /// JSON file the translation cache is loaded from and saved to.
    pub persist_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_translations: Some(10_000),
            max_audio_clips: Some(200),
            persist_path: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
