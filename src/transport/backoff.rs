//! Exponential backoff between delivery attempts.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// Grows as `base * 2^(attempt - 1)`, capped at `max`. With `jitter` enabled up to 10%
/// of the capped delay is added on top, so the result may exceed `max` by that margin.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_ms = if jitter && capped >= 10 {
        rand::thread_rng().gen_range(0..capped / 10)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter_ms))
}
