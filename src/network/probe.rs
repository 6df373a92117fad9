//! Connectivity probes.
//!
//! A probe takes one measurement of the path to the backend. `None` means
//! the backend could not be reached at all.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::client::backend::is_loopback;

/// One latency/throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub latency: Duration,
    pub bandwidth_bps: u64,
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn measure(&self) -> Option<ProbeSample>;
}

/// Probe that times an HTTP GET against a fixed URL.
///
/// Latency is time to response headers; throughput is derived from the
/// body size and the time taken to read it. Any HTTP status counts as
/// reachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let url = url.into();
        let mut builder = reqwest::Client::builder();
        if Url::parse(&url).is_ok_and(|parsed| is_loopback(&parsed)) {
            builder = builder.no_proxy();
        }
        Self {
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
            url,
            timeout,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn measure(&self) -> Option<ProbeSample> {
        let started = Instant::now();
        let request = self.client.get(&self.url).header("user-agent", "resilient-translator-probe");

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(url = %self.url, error = %e, "Probe failed: connection error");
                return None;
            }
            Err(_) => {
                tracing::debug!(url = %self.url, "Probe failed: timeout");
                return None;
            }
        };
        let latency = started.elapsed();

        let body_started = Instant::now();
        let remaining = self.timeout.saturating_sub(latency);
        let bytes = match tokio::time::timeout(remaining, response.bytes()).await {
            Ok(Ok(bytes)) => bytes.len() as u64,
            _ => {
                tracing::debug!(url = %self.url, "Probe body read failed");
                return None;
            }
        };

        Some(ProbeSample {
            latency,
            bandwidth_bps: bandwidth_bps(bytes, body_started.elapsed()),
        })
    }
}

/// Bits per second for `bytes` transferred in `elapsed`. Transfers too fast
/// to time are reported as `u64::MAX`.
pub fn bandwidth_bps(bytes: u64, elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros();
    if micros == 0 {
        return u64::MAX;
    }
    let bps = (bytes as u128 * 8 * 1_000_000) / micros;
    u64::try_from(bps).unwrap_or(u64::MAX)
}
