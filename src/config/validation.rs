//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, recovery timeout within bounds)
//! - Check the backend URL parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use url::Url;

use crate::config::schema::ClientConfig;
use crate::resilience::circuit_breaker::{MAX_RECOVERY_TIMEOUT, MIN_RECOVERY_TIMEOUT};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let backend = &config.backend;
    match Url::parse(&backend.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "backend.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("backend.base_url", e.to_string())),
    }
    if backend.api_key_header.trim().is_empty() {
        errors.push(ValidationError::new("backend.api_key_header", "must not be empty"));
    }
    if backend.max_text_chars == 0 {
        errors.push(ValidationError::new("backend.max_text_chars", "must be > 0"));
    }

    let credentials = &config.credentials;
    if credentials.secret_env_var.trim().is_empty() {
        errors.push(ValidationError::new("credentials.secret_env_var", "must not be empty"));
    }
    if credentials.service_id.trim().is_empty() {
        errors.push(ValidationError::new("credentials.service_id", "must not be empty"));
    }
    if credentials.rotation_period_days == 0 {
        errors.push(ValidationError::new("credentials.rotation_period_days", "must be > 0"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.requests_per_minute == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_minute", "must be > 0"));
    }
    for (endpoint, limit) in &rate_limit.endpoints {
        if *limit == 0 {
            errors.push(ValidationError::new(
                &format!("rate_limit.endpoints.{endpoint}"),
                "must be > 0",
            ));
        }
    }
    if rate_limit.queue_capacity == 0 {
        errors.push(ValidationError::new("rate_limit.queue_capacity", "must be > 0"));
    }
    if rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    let recovery = breaker.recovery_timeout_secs;
    if recovery < MIN_RECOVERY_TIMEOUT.as_secs() || recovery > MAX_RECOVERY_TIMEOUT.as_secs() {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_timeout_secs",
            format!(
                "must be between {} and {}",
                MIN_RECOVERY_TIMEOUT.as_secs(),
                MAX_RECOVERY_TIMEOUT.as_secs()
            ),
        ));
    }

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(ValidationError::new("retries.base_delay_ms", "must be > 0"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    let timeouts = &config.timeouts;
    if !(1..=10).contains(&timeouts.history_size) {
        errors.push(ValidationError::new("timeouts.history_size", "must be between 1 and 10"));
    }
    let tiers = [
        timeouts.excellent_ms,
        timeouts.good_ms,
        timeouts.poor_ms,
        timeouts.very_poor_ms,
    ];
    if tiers.iter().any(|ms| *ms == 0) {
        errors.push(ValidationError::new("timeouts", "tier timeouts must be > 0"));
    }
    if tiers.windows(2).any(|pair| pair[0] > pair[1]) {
        errors.push(ValidationError::new(
            "timeouts",
            "tier timeouts must not shrink as quality degrades",
        ));
    }

    let network = &config.network;
    if network.interval_secs == 0 {
        errors.push(ValidationError::new("network.interval_secs", "must be > 0"));
    }
    if let Some(probe_url) = &network.probe_url {
        if let Err(e) = Url::parse(probe_url) {
            errors.push(ValidationError::new("network.probe_url", e.to_string()));
        }
    }

    if config.cache.max_translations == Some(0) {
        errors.push(ValidationError::new("cache.max_translations", "must be > 0 when set"));
    }
    if config.cache.max_audio_clips == Some(0) {
        errors.push(ValidationError::new("cache.max_audio_clips", "must be > 0 when set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
