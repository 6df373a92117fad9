//! Adaptive timeout enforcement.
//!
//! # Responsibilities
//! - Derive a per-operation deadline from network tier and observed latency
//! - Wrap backend calls with that deadline
//! - Record successful response times
//!
//! # Design Decisions
//! - A timeout is never shorter than what has been observed succeeding:
//!   `max(base, 1.5 × average, 1.2 × max)` over recent history
//! - Only successful calls feed the history
//! - Timed-out attempts surface as `ClientError::Timeout` (transient)

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::client::types::{ClientError, ClientResult};
use crate::config::schema::TimeoutConfig;
use crate::network::quality::{NetworkQualityMonitor, NetworkTier};

const AVERAGE_FACTOR: f64 = 1.5;
const MAX_FACTOR: f64 = 1.2;

/// Base timeout per network tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    pub excellent: Duration,
    pub good: Duration,
    pub poor: Duration,
    pub very_poor: Duration,
}

impl TierTimeouts {
    pub fn for_tier(&self, tier: NetworkTier) -> Duration {
        match tier {
            NetworkTier::Excellent => self.excellent,
            NetworkTier::Good => self.good,
            NetworkTier::Poor => self.poor,
            NetworkTier::VeryPoor | NetworkTier::Offline => self.very_poor,
        }
    }
}

impl From<&TimeoutConfig> for TierTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            excellent: Duration::from_millis(config.excellent_ms),
            good: Duration::from_millis(config.good_ms),
            poor: Duration::from_millis(config.poor_ms),
            very_poor: Duration::from_millis(config.very_poor_ms),
        }
    }
}

pub struct AdaptiveTimeoutManager {
    base: TierTimeouts,
    history_size: usize,
    history: DashMap<String, VecDeque<Duration>>,
    network: NetworkQualityMonitor,
}

impl AdaptiveTimeoutManager {
    pub fn new(config: &TimeoutConfig, network: NetworkQualityMonitor) -> Self {
        Self {
            base: TierTimeouts::from(config),
            history_size: config.history_size.clamp(1, 10),
            history: DashMap::new(),
            network,
        }
    }

    /// Timeout for `operation` at the current network tier.
    pub fn timeout_for(&self, operation: &str) -> Duration {
        self.timeout_for_tier(operation, self.network.tier())
    }

    pub fn timeout_for_tier(&self, operation: &str, tier: NetworkTier) -> Duration {
        let base = self.base.for_tier(tier);
        let Some(samples) = self.history.get(operation) else {
            return base;
        };
        if samples.is_empty() {
            return base;
        }

        let total: Duration = samples.iter().sum();
        let average = total / samples.len() as u32;
        let slowest = samples.iter().max().copied().unwrap_or_default();

        base.max(average.mul_f64(AVERAGE_FACTOR))
            .max(slowest.mul_f64(MAX_FACTOR))
    }

    /// Remember a successful response time.
    pub fn record(&self, operation: &str, elapsed: Duration) {
        let mut samples = self.history.entry(operation.to_string()).or_default();
        samples.push_back(elapsed);
        while samples.len() > self.history_size {
            samples.pop_front();
        }
    }

    pub fn history(&self, operation: &str) -> Vec<Duration> {
        self.history
            .get(operation)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Run `future` under the timeout for `operation`. Successful calls are
    /// recorded; an elapsed deadline cancels the future.
    pub async fn with_timeout<T, Fut>(&self, operation: &str, future: Fut) -> ClientResult<T>
    where
        Fut: Future<Output = ClientResult<T>>,
    {
        let limit = self.timeout_for(operation);
        let started = Instant::now();
        match tokio::time::timeout(limit, future).await {
            Ok(Ok(value)) => {
                self.record(operation, started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Attempt timed out");
                Err(ClientError::Timeout(limit))
            }
        }
    }
}

impl std::fmt::Debug for AdaptiveTimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveTimeoutManager")
            .field("base", &self.base)
            .field("history_size", &self.history_size)
            .finish()
    }
}
