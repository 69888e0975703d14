//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate the delay before retry `attempt` (0-based).
///
/// `min(initial * multiplier^attempt, max)`, then with jitter the delay is
/// drawn from `[delay/2, 1.5 * delay)`.
pub fn calculate_backoff(
    attempt: u32,
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let max_nanos = max.as_nanos() as f64;
    let scaled = initial.as_nanos() as f64 * multiplier.powi(exponent);
    let capped = if scaled.is_finite() { scaled.min(max_nanos) } else { max_nanos };
    let delay = Duration::from_nanos(capped.max(0.0) as u64);

    if jitter {
        apply_jitter(delay)
    } else {
        delay
    }
}

/// Half fixed, half random: `delay/2 + random(0, delay)`.
fn apply_jitter(delay: Duration) -> Duration {
    let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return delay;
    }
    let random = rand::thread_rng().gen_range(0..nanos);
    Duration::from_nanos((nanos / 2).saturating_add(random))
}
