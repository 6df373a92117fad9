//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the delay added or removed at random.
const JITTER_RATIO: f64 = 0.1;

/// Delay before retry number `retry` (0-based), without jitter:
/// `min(base * 2^retry, max)`.
pub fn unjittered_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    base.saturating_mul(factor).min(max)
}

/// Delay before retry number `retry` (0-based), within ±10% of
/// [`unjittered_delay`].
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let delay = unjittered_delay(retry, base, max);
    let jitter = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
    delay.mul_f64(1.0 + jitter)
}
