//! Exponential backoff with jitter for retryable failures

use std::time::Duration;

use cardbox_core::config::RetryConfig;
use rand::Rng;

/// Computes the delay before retry attempt `attempt` (1-based).
///
/// Exponential in the attempt number, capped, with up to 50% additive
/// jitter so concurrent clients don't retry in lockstep.
pub fn retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base = base_delay(attempt, config);
    let jitter_cap = base.as_millis() as u64 / 2;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap)
    };
    base + Duration::from_millis(jitter)
}

/// Deterministic part of the delay: `base * multiplier^(attempt-1)`,
/// capped at `cap_ms`
fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = (config.multiplier as u64).saturating_pow(exponent);
    let millis = config.base_delay_ms.saturating_mul(factor);
    Duration::from_millis(millis.min(config.cap_ms))
}
