//! Network quality monitoring.
//!
//! # Responsibilities
//! - Classify probe samples into quality tiers
//! - Publish the current condition for lock-free reads
//! - Notify subscribers when the tier changes
//!
//! # Design Decisions
//! - Only tier changes are broadcast; latency drift within a tier is not
//! - Slow subscribers may miss intermediate tiers but always observe the
//!   latest one
//! - Until the first sample arrives the network is assumed `Good`

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::NetworkConfig;
use crate::network::probe::{Probe, ProbeSample};
use crate::observability::metrics;

const EXCELLENT_LATENCY: Duration = Duration::from_millis(50);
const EXCELLENT_BANDWIDTH_BPS: u64 = 5_000_000;
const GOOD_LATENCY: Duration = Duration::from_millis(200);
const GOOD_BANDWIDTH_BPS: u64 = 1_000_000;
const POOR_LATENCY: Duration = Duration::from_millis(1000);
const POOR_BANDWIDTH_BPS: u64 = 100_000;

/// Discrete connectivity tier, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTier {
    Excellent,
    Good,
    Poor,
    VeryPoor,
    Offline,
}

impl NetworkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkTier::Excellent => "excellent",
            NetworkTier::Good => "good",
            NetworkTier::Poor => "poor",
            NetworkTier::VeryPoor => "very_poor",
            NetworkTier::Offline => "offline",
        }
    }

    /// Numeric level for gauges: 0 (excellent) to 4 (offline).
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time connectivity reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCondition {
    pub tier: NetworkTier,
    pub observed_latency_ms: Option<u64>,
    pub observed_bandwidth_bps: Option<u64>,
}

impl NetworkCondition {
    pub fn offline() -> Self {
        Self {
            tier: NetworkTier::Offline,
            observed_latency_ms: None,
            observed_bandwidth_bps: None,
        }
    }

    /// A condition with no measurements attached.
    pub fn assumed(tier: NetworkTier) -> Self {
        Self {
            tier,
            observed_latency_ms: None,
            observed_bandwidth_bps: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.tier == NetworkTier::Offline
    }
}

impl Default for NetworkCondition {
    fn default() -> Self {
        Self::assumed(NetworkTier::Good)
    }
}

/// Bucket a probe sample into a tier. `None` (unreachable) is offline.
pub fn classify(sample: Option<&ProbeSample>) -> NetworkCondition {
    let Some(sample) = sample else {
        return NetworkCondition::offline();
    };

    let latency = sample.latency;
    let bandwidth = sample.bandwidth_bps;
    let tier = if latency < EXCELLENT_LATENCY && bandwidth >= EXCELLENT_BANDWIDTH_BPS {
        NetworkTier::Excellent
    } else if latency < GOOD_LATENCY && bandwidth >= GOOD_BANDWIDTH_BPS {
        NetworkTier::Good
    } else if latency <= POOR_LATENCY && bandwidth >= POOR_BANDWIDTH_BPS {
        NetworkTier::Poor
    } else {
        NetworkTier::VeryPoor
    };

    NetworkCondition {
        tier,
        observed_latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
        observed_bandwidth_bps: Some(bandwidth),
    }
}

/// Receiver for tier changes. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops delivery.
pub struct Subscription {
    rx: broadcast::Receiver<NetworkCondition>,
    monitor: Weak<MonitorState>,
}

impl Subscription {
    /// Wait for the next tier change. Returns `None` once the monitor is gone.
    ///
    /// If this subscriber fell behind, the missed changes are coalesced into
    /// the monitor's current condition.
    pub async fn changed(&mut self) -> Option<NetworkCondition> {
        match self.rx.recv().await {
            Ok(condition) => Some(condition),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Network subscriber lagged, delivering latest condition");
                let monitor = self.monitor.upgrade()?;
                self.rx = self.rx.resubscribe();
                Some(**monitor.current.load())
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn unsubscribe(self) {}
}

struct MonitorState {
    current: ArcSwap<NetworkCondition>,
    tx: broadcast::Sender<NetworkCondition>,
}

/// Classifies connectivity and reports tier transitions.
#[derive(Clone)]
pub struct NetworkQualityMonitor {
    state: Arc<MonitorState>,
    probe: Option<Arc<dyn Probe>>,
    interval: Duration,
}

impl NetworkQualityMonitor {
    /// Monitor driven by `probe` every `interval`.
    pub fn new(probe: Arc<dyn Probe>, interval: Duration) -> Self {
        let mut monitor = Self::manual();
        monitor.probe = Some(probe);
        monitor.interval = interval;
        monitor
    }

    /// Monitor updated only through [`report`](Self::report).
    pub fn manual() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(MonitorState {
                current: ArcSwap::from_pointee(NetworkCondition::default()),
                tx,
            }),
            probe: None,
            interval: Duration::from_secs(15),
        }
    }

    pub fn from_config(config: &NetworkConfig, probe: Arc<dyn Probe>) -> Self {
        Self::new(probe, Duration::from_secs(config.interval_secs))
    }

    pub fn current(&self) -> NetworkCondition {
        **self.state.current.load()
    }

    pub fn tier(&self) -> NetworkTier {
        self.current().tier
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.state.tx.subscribe(),
            monitor: Arc::downgrade(&self.state),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.tx.receiver_count()
    }

    /// Publish a new condition. Returns `true` if the tier changed.
    pub fn report(&self, condition: NetworkCondition) -> bool {
        let previous = self.state.current.swap(Arc::new(condition));
        if previous.tier == condition.tier {
            return false;
        }

        tracing::info!(
            from = %previous.tier,
            to = %condition.tier,
            latency_ms = ?condition.observed_latency_ms,
            "Network tier changed"
        );
        metrics::record_network_tier(condition.tier);
        // No receivers is fine; the value is still readable via current().
        let _ = self.state.tx.send(condition);
        true
    }

    /// Take one sample with the configured probe and publish it.
    pub async fn sample(&self) -> NetworkCondition {
        let Some(probe) = &self.probe else {
            return self.current();
        };
        let condition = classify(probe.measure().await.as_ref());
        self.report(condition);
        condition
    }

    /// Sample periodically until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.probe.is_none() {
            tracing::info!("Network monitor has no probe, not sampling");
            return;
        }

        tracing::info!(interval = ?self.interval, "Network monitor starting");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Network monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for NetworkQualityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkQualityMonitor")
            .field("current", &self.current())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn sample(latency_ms: u64, bandwidth_bps: u64) -> ProbeSample {
        ProbeSample {
            latency: Duration::from_millis(latency_ms),
            bandwidth_bps,
        }
    }

    struct ScriptedProbe {
        samples: Mutex<Vec<Option<ProbeSample>>>,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn measure(&self) -> Option<ProbeSample> {
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                samples.remove(0)
            } else {
                samples[0]
            }
        }
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify(None).tier, NetworkTier::Offline);
        assert_eq!(classify(Some(&sample(20, 10_000_000))).tier, NetworkTier::Excellent);
        assert_eq!(classify(Some(&sample(20, 2_000_000))).tier, NetworkTier::Good);
        assert_eq!(classify(Some(&sample(150, 2_000_000))).tier, NetworkTier::Good);
        assert_eq!(classify(Some(&sample(500, 500_000))).tier, NetworkTier::Poor);
        assert_eq!(classify(Some(&sample(1000, 100_000))).tier, NetworkTier::Poor);
        assert_eq!(classify(Some(&sample(1500, 10_000_000))).tier, NetworkTier::VeryPoor);
        assert_eq!(classify(Some(&sample(30, 50_000))).tier, NetworkTier::VeryPoor);

        let condition = classify(Some(&sample(120, 3_000_000)));
        assert_eq!(condition.observed_latency_ms, Some(120));
        assert_eq!(condition.observed_bandwidth_bps, Some(3_000_000));
    }

    #[tokio::test]
    async fn test_notifies_only_on_tier_change() {
        let monitor = NetworkQualityMonitor::manual();
        let mut sub = monitor.subscribe();

        assert!(!monitor.report(NetworkCondition::assumed(NetworkTier::Good)));
        assert!(monitor.report(NetworkCondition::offline()));
        assert!(!monitor.report(NetworkCondition::offline()));
        assert!(monitor.report(NetworkCondition::assumed(NetworkTier::Excellent)));

        assert_eq!(sub.changed().await.unwrap().tier, NetworkTier::Offline);
        assert_eq!(sub.changed().await.unwrap().tier, NetworkTier::Excellent);
        assert_eq!(monitor.tier(), NetworkTier::Excellent);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let monitor = NetworkQualityMonitor::manual();
        let sub = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_gets_latest() {
        let monitor = NetworkQualityMonitor::manual();
        let mut sub = monitor.subscribe();
        for i in 0..40 {
            let tier = if i % 2 == 0 { NetworkTier::Offline } else { NetworkTier::Poor };
            monitor.report(NetworkCondition::assumed(tier));
        }
        // 40 reports overflow the channel; the subscriber sees the final tier.
        assert_eq!(sub.changed().await.unwrap().tier, NetworkTier::Poor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_samples_until_shutdown() {
        let probe = Arc::new(ScriptedProbe {
            samples: Mutex::new(vec![Some(sample(10, 50_000_000)), None]),
        });
        let monitor = NetworkQualityMonitor::new(probe, Duration::from_secs(5));
        let mut sub = monitor.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(monitor.clone().run(shutdown_rx));

        assert_eq!(sub.changed().await.unwrap().tier, NetworkTier::Excellent);
        assert_eq!(sub.changed().await.unwrap().tier, NetworkTier::Offline);
        assert!(monitor.current().is_offline());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
