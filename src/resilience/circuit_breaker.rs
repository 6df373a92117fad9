//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: one probe request is testing recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after recovery timeout (first caller becomes the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; concurrent callers are rejected
//! - Recovery timeout follows network quality, clamped to 2-30 s
//! - A probe abandoned without an outcome reopens the circuit without
//!   restarting the recovery clock

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::types::{ClientError, ClientResult};
use crate::config::schema::CircuitBreakerConfig;
use crate::network::quality::NetworkTier;
use crate::observability::metrics;

pub const MIN_RECOVERY_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    tier: NetworkTier,
}

/// Scale applied to the configured recovery timeout for a network tier.
fn tier_scale(tier: NetworkTier) -> f64 {
    match tier {
        NetworkTier::Excellent => 0.5,
        NetworkTier::Good => 1.0,
        NetworkTier::Poor => 2.0,
        NetworkTier::VeryPoor | NetworkTier::Offline => 3.0,
    }
}

/// Circuit breaker for a single logical endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    failure_threshold: u32,
    base_recovery: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: &str, failure_threshold: u32, base_recovery: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            failure_threshold: failure_threshold.max(1),
            base_recovery,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                tier: NetworkTier::Good,
            }),
        }
    }

    pub fn from_config(endpoint: &str, config: &CircuitBreakerConfig) -> Self {
        Self::new(
            endpoint,
            config.failure_threshold,
            Duration::from_secs(config.recovery_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Adjust the recovery timeout to the current network tier.
    pub fn set_network_tier(&self, tier: NetworkTier) {
        self.lock().tier = tier;
    }

    pub fn recovery_timeout(&self) -> Duration {
        let tier = self.lock().tier;
        self.base_recovery
            .mul_f64(tier_scale(tier))
            .clamp(MIN_RECOVERY_TIMEOUT, MAX_RECOVERY_TIMEOUT)
    }

    /// Ask to send one request. Fails fast with `CircuitOpen` while open.
    pub fn try_acquire(&self) -> ClientResult<CircuitPermit<'_>> {
        let recovery = self.recovery_timeout();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= recovery);
                if !recovered {
                    return Err(self.open_error());
                }
                inner.state = CircuitState::HalfOpen;
                drop(inner);
                tracing::info!(endpoint = %self.endpoint, "Circuit half-open, admitting probe");
                metrics::record_circuit_state(&self.endpoint, CircuitState::HalfOpen);
                Ok(CircuitPermit::new(self, true))
            }
            // The probe is in flight.
            CircuitState::HalfOpen => Err(self.open_error()),
        }
    }

    /// Run `operation` under the breaker, recording its outcome.
    pub async fn call<T, F, Fut>(&self, operation: F) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(&result);
        result
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if probe && inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            drop(inner);
            tracing::info!(endpoint = %self.endpoint, "Probe succeeded, circuit closed");
            metrics::record_circuit_state(&self.endpoint, CircuitState::Closed);
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::HalfOpen => probe,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            let failures = inner.consecutive_failures;
            drop(inner);
            tracing::warn!(
                endpoint = %self.endpoint,
                failures,
                probe,
                "Circuit opened"
            );
            metrics::record_circuit_state(&self.endpoint, CircuitState::Open);
        }
    }

    fn on_abandoned(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            tracing::debug!(endpoint = %self.endpoint, "Probe abandoned, circuit reopened");
        }
    }

    fn open_error(&self) -> ClientError {
        ClientError::CircuitOpen {
            endpoint: self.endpoint.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

/// Permission to send one request through the breaker.
///
/// Dropping the permit without recording an outcome counts as neither
/// success nor failure.
#[must_use = "record the request outcome on the permit"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// Record a result. Errors that do not implicate the backend count
    /// as a successful round trip.
    pub fn record<T>(self, result: &ClientResult<T>) {
        match result {
            Err(e) if e.trips_breaker() => self.failure(),
            _ => self.success(),
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.probe);
        }
    }
}
