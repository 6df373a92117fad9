//! Requests-per-minute limiter with a bounded priority queue.
//!
//! # Behavior
//! - Under budget: admitted immediately, window counter incremented
//! - At budget: queued (higher priority first, FIFO among equals)
//! - Queue full: rejected
//! - Window rollover: queue drained in order up to the refreshed budget
//!
//! Queued requests are cancelled by dropping (or calling
//! [`QueuedRequest::cancel`] on) the handle; nothing else is affected.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::client::types::{ClientError, ClientResult};
use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

/// Request priority. Higher variants drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Granted admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Position of this request within its window (0-based).
    pub slot: u32,
    /// Whether the request waited in the queue.
    pub queued: bool,
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug)]
pub enum Acquire {
    Admitted(Admission),
    Queued(QueuedRequest),
    /// The queue is at capacity.
    Rejected,
}

/// Point-in-time view of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub request_count: u32,
    pub limit: u32,
    pub queued: usize,
}

struct Waiter {
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<Admission>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WindowState {
    window_start: Instant,
    request_count: u32,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
}

struct Shared {
    name: String,
    limit: u32,
    window: Duration,
    queue_capacity: usize,
    state: Mutex<WindowState>,
}

impl Shared {
    /// Start a new window if the current one has elapsed, releasing queued
    /// requests into it. Returns the number released.
    fn roll_if_due(&self, now: Instant) -> usize {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        if now.duration_since(state.window_start) < self.window {
            return 0;
        }

        state.window_start = now;
        state.request_count = 0;

        let mut released = 0;
        while state.request_count < self.limit {
            let Some(waiter) = state.queue.pop() else {
                break;
            };
            let admission = Admission {
                slot: state.request_count,
                queued: true,
            };
            // A closed receiver means the caller gave up; its slot is not consumed.
            if waiter.tx.send(admission).is_ok() {
                state.request_count += 1;
                released += 1;
            }
        }

        if released > 0 {
            tracing::debug!(limiter = %self.name, released, remaining = state.queue.len(), "Window rolled over");
        }
        released
    }

    fn window_end(&self) -> Instant {
        let state = self.state.lock().expect("rate limiter mutex poisoned");
        state.window_start + self.window
    }

    fn remove(&self, seq: u64) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.queue.retain(|w| w.seq != seq);
    }
}

/// Rolling-window rate limiter for one endpoint.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per `window`.
    pub fn new(name: &str, limit: u32, queue_capacity: usize, window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                limit,
                window,
                queue_capacity,
                state: Mutex::new(WindowState {
                    window_start: Instant::now(),
                    request_count: 0,
                    queue: BinaryHeap::new(),
                    next_seq: 0,
                }),
            }),
        }
    }

    /// Build the limiter for `endpoint` from configuration.
    pub fn from_config(endpoint: &str, config: &RateLimitConfig) -> Self {
        Self::new(
            endpoint,
            config.limit_for(endpoint),
            config.queue_capacity,
            Duration::from_secs(config.window_secs),
        )
    }

    /// Admit, queue or reject a request without waiting.
    pub fn try_acquire(&self, priority: Priority) -> Acquire {
        let now = Instant::now();
        self.shared.roll_if_due(now);

        let mut state = self.shared.state.lock().expect("rate limiter mutex poisoned");
        if state.request_count < self.shared.limit && state.queue.is_empty() {
            let admission = Admission {
                slot: state.request_count,
                queued: false,
            };
            state.request_count += 1;
            metrics::record_rate_limit(&self.shared.name, "admitted");
            return Acquire::Admitted(admission);
        }

        if state.queue.len() >= self.shared.queue_capacity {
            tracing::warn!(
                limiter = %self.shared.name,
                capacity = self.shared.queue_capacity,
                "Rate limit queue full, rejecting request"
            );
            metrics::record_rate_limit(&self.shared.name, "rejected");
            return Acquire::Rejected;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        state.queue.push(Waiter { priority, seq, tx });
        metrics::record_rate_limit(&self.shared.name, "queued");

        Acquire::Queued(QueuedRequest {
            seq,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Acquire a slot, waiting in the queue if the budget is spent.
    ///
    /// Dropping the returned future while queued cancels the request.
    pub async fn acquire(&self, priority: Priority) -> ClientResult<Admission> {
        match self.try_acquire(priority) {
            Acquire::Admitted(admission) => Ok(admission),
            Acquire::Queued(queued) => queued.wait().await,
            Acquire::Rejected => Err(ClientError::QueueFull),
        }
    }

    /// Roll the window over if it has elapsed. Returns the number of queued
    /// requests released.
    pub fn refresh(&self) -> usize {
        self.shared.roll_if_due(Instant::now())
    }

    pub fn snapshot(&self) -> RateLimitWindow {
        let state = self.shared.state.lock().expect("rate limiter mutex poisoned");
        RateLimitWindow {
            window_start: state.window_start,
            request_count: state.request_count,
            limit: self.shared.limit,
            queued: state.queue.len(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.shared.limit
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.shared.name)
            .field("limit", &self.shared.limit)
            .field("window", &self.shared.window)
            .finish()
    }
}

/// Handle to a queued request.
pub struct QueuedRequest {
    seq: u64,
    rx: oneshot::Receiver<Admission>,
    shared: Arc<Shared>,
}

impl QueuedRequest {
    /// Wait until the request is released into a window.
    pub async fn wait(mut self) -> ClientResult<Admission> {
        loop {
            let deadline = self.shared.window_end();
            tokio::select! {
                released = &mut self.rx => {
                    return released.map_err(|_| ClientError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.shared.roll_if_due(Instant::now());
                }
            }
        }
    }

    /// Withdraw the request from the queue.
    pub fn cancel(self) {}
}

impl Drop for QueuedRequest {
    fn drop(&mut self) {
        self.shared.remove(self.seq);
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest").field("seq", &self.seq).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(outcome: Acquire) -> QueuedRequest {
        match outcome {
            Acquire::Queued(q) => q,
            other => panic!("expected queued, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_limit() {
        let limiter = RateLimiter::new("translate", 60, 100, Duration::from_secs(60));
        let mut admitted = 0;
        let mut waiting = Vec::new();
        for _ in 0..65 {
            match limiter.try_acquire(Priority::Normal) {
                Acquire::Admitted(_) => admitted += 1,
                Acquire::Queued(q) => waiting.push(q),
                Acquire::Rejected => panic!("queue should not be full"),
            }
        }
        assert_eq!(admitted, 60);
        assert_eq!(waiting.len(), 5);
        assert_eq!(limiter.snapshot().request_count, 60);
        assert_eq!(limiter.snapshot().queued, 5);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.refresh(), 5);

        for (i, q) in waiting.into_iter().enumerate() {
            let admission = q.wait().await.unwrap();
            assert_eq!(admission.slot, i as u32);
            assert!(admission.queued);
        }
        assert_eq!(limiter.snapshot().request_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_fifo() {
        let limiter = RateLimiter::new("translate", 4, 10, Duration::from_secs(60));
        for _ in 0..4 {
            assert!(matches!(limiter.try_acquire(Priority::Normal), Acquire::Admitted(_)));
        }
        let low = queued(limiter.try_acquire(Priority::Low));
        let high_a = queued(limiter.try_acquire(Priority::High));
        let normal = queued(limiter.try_acquire(Priority::Normal));
        let high_b = queued(limiter.try_acquire(Priority::High));

        tokio::time::advance(Duration::from_secs(60)).await;
        limiter.refresh();

        assert_eq!(high_a.wait().await.unwrap().slot, 0);
        assert_eq!(high_b.wait().await.unwrap().slot, 1);
        assert_eq!(normal.wait().await.unwrap().slot, 2);
        assert_eq!(low.wait().await.unwrap().slot, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_rejects() {
        let limiter = RateLimiter::new("tts", 1, 2, Duration::from_secs(60));
        assert!(matches!(limiter.try_acquire(Priority::Normal), Acquire::Admitted(_)));
        let _a = queued(limiter.try_acquire(Priority::Normal));
        let _b = queued(limiter.try_acquire(Priority::Normal));
        assert!(matches!(limiter.try_acquire(Priority::Critical), Acquire::Rejected));
        assert_eq!(
            limiter.acquire(Priority::Normal).await.unwrap_err(),
            ClientError::QueueFull
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_is_skipped() {
        let limiter = RateLimiter::new("translate", 1, 10, Duration::from_secs(60));
        assert!(matches!(limiter.try_acquire(Priority::Normal), Acquire::Admitted(_)));
        let first = queued(limiter.try_acquire(Priority::Normal));
        let second = queued(limiter.try_acquire(Priority::Normal));
        assert_eq!(limiter.snapshot().queued, 2);

        first.cancel();
        assert_eq!(limiter.snapshot().queued, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.refresh(), 1);
        assert_eq!(second.wait().await.unwrap().slot, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_rollover() {
        let limiter = RateLimiter::new("translate", 1, 10, Duration::from_secs(60));
        limiter.acquire(Priority::Normal).await.unwrap();

        let start = Instant::now();
        let admission = limiter.acquire(Priority::Normal).await.unwrap();
        assert!(admission.queued);
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquire_future_cancels() {
        let limiter = RateLimiter::new("translate", 1, 10, Duration::from_secs(60));
        limiter.acquire(Priority::Normal).await.unwrap();

        let pending = tokio::time::timeout(
            Duration::from_secs(1),
            limiter.acquire(Priority::Normal),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(limiter.snapshot().queued, 0);
    }
}
