//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Hard ceiling on any single inter-attempt delay.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Delay before attempt `attempt` (0-based). Attempt 0 is immediate.
///
/// `base * 2^attempt` plus up to 10% jitter, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let jitter_fraction = rand::thread_rng().gen_range(0.0..=1.0);
    backoff_with_jitter(attempt, base_ms, max_ms, jitter_fraction)
}

/// Deterministic core of [`calculate_backoff`]; `jitter_fraction` in `[0, 1]`
/// scales the 10% jitter window.
pub fn backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64, jitter_fraction: f64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let ceiling = max_ms.min(MAX_DELAY_MS);
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = exponential as f64 * 0.1;
    let jitter = (jitter_range * jitter_fraction.clamp(0.0, 1.0)) as u64;

    Duration::from_millis(exponential.saturating_add(jitter).min(ceiling))
}
