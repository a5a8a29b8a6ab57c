//! Reconnect backoff.
//!
//! Grounded on the lineage's `retry_strategies.rs`: a jittered exponential backoff built on
//! `tokio_retry2`, seeded here from the configured `reconnect_wait_interval` rather than a fixed
//! constant since the run supervisor's base delay is user-configurable.

use std::time::Duration;

use tokio_retry2::strategy::{jitter_range, ExponentialBackoff};

const EXPONENT_BASE: u64 = 2;
const JITTER_FRACTION: f64 = 0.20;
/// After this many growing steps, hold at the last (unjittered) duration forever — the run
/// supervisor is itself the outer retry bound (it keeps reconnecting until cancelled), so the
/// backoff itself must stop growing rather than eventually waiting for days between attempts.
const MAX_GROWTH_STEPS: usize = 5;

/// A jittered exponential backoff iterator starting at `base`, growing for [`MAX_GROWTH_STEPS`]
/// steps and then repeating that last duration forever.
pub fn reconnect_backoff(base: Duration) -> impl Iterator<Item = Duration> {
    let base_ms = base.as_millis().max(1) as u64;
    let backoff = ExponentialBackoff::from_millis(EXPONENT_BASE).factor(base_ms);

    let last = backoff.clone().nth(MAX_GROWTH_STEPS - 1).unwrap_or_else(|| {
        Duration::from_millis(base_ms * EXPONENT_BASE.pow(MAX_GROWTH_STEPS as u32))
    });

    let bounded = backoff
        .map(jitter_range(1.0 - JITTER_FRACTION, 1.0 + JITTER_FRACTION))
        .take(MAX_GROWTH_STEPS);
    bounded.chain(std::iter::repeat(last))
}
