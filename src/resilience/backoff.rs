//! Exponential backoff with jitter.
//!
//! Used by the accept loop to slow down while the process is out of file
//! descriptors or the kernel keeps resetting half-open connections.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`,
/// capped at `max_ms`, plus up to 10% jitter. Attempt 0 means no delay.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_base_delay() {
        let delay = calculate_backoff(1, 5, 1000);
        assert!(delay >= Duration::from_millis(5));
        assert!(delay < Duration::from_millis(6));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let delay = calculate_backoff(4, 100, 10_000);
        assert!(delay >= Duration::from_millis(800));
        assert!(delay < Duration::from_millis(880));
    }

    #[test]
    fn delay_is_capped() {
        for attempt in [11, 40, u32::MAX] {
            let delay = calculate_backoff(attempt, 5, 1000);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay < Duration::from_millis(1100));
        }
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(calculate_backoff(0, 5, 1000), Duration::ZERO);
    }
}
