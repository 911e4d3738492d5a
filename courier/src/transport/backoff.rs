//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `retry` (1-based).
///
/// Doubles from `base` per retry, capped at `max`, plus up to 10% jitter.
pub fn calculate_backoff(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms
        .saturating_mul(2u64.saturating_pow(retry - 1))
        .min(max_ms);

    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        let first = calculate_backoff(1, base, max);
        assert!(first >= base && first < Duration::from_millis(110));

        let second = calculate_backoff(2, base, max);
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(220));

        let capped = calculate_backoff(10, base, max);
        assert!(capped >= max && capped < Duration::from_millis(1100));
    }

    #[test]
    fn zero_retry_has_no_delay() {
        assert_eq!(
            calculate_backoff(0, Duration::from_millis(100), Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn huge_retry_count_does_not_overflow() {
        let delay = calculate_backoff(u32::MAX, Duration::from_secs(1), Duration::from_secs(2));
        assert!(delay >= Duration::from_secs(2));
    }
}
