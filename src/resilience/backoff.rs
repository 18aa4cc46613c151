//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Calculate the delay before retry number `retry` (1-based).
///
/// `base_ms * multiplier^(retry - 1)`, capped at `max_ms`. With `jitter`
/// up to 10% of the capped delay is added on top.
pub fn calculate_backoff(retry: u32, base_ms: u64, multiplier: u64, max_ms: u64, jitter: bool) -> Duration {
    if retry == 0 {
        return Duration::from_millis(0);
    }

    let factor = multiplier.saturating_pow(retry - 1);
    let delay_ms = base_ms.saturating_mul(factor);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_ms = if jitter {
        let jitter_range = capped_delay / 10;
        if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        }
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter_ms)
}
