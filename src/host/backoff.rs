//! src/host/backoff.rs
//!
//! Step-function backoff governing both the per-attempt dial deadline and
//! the pause between retries.

use std::time::Duration;

/// `backoff_millis = min(15000, 2000 * (attempt / 16 + 1))`, `attempt`
/// starting at zero for the first dial.
pub fn backoff_millis(attempt: u32) -> u64 {
    std::cmp::min(15_000, 2_000 * (attempt / 16 + 1) as u64)
}

pub fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_millis(backoff_millis(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_base_slice() {
        assert_eq!(backoff_millis(0), 2000);
    }

    #[test]
    fn backoff_steps_every_sixteen_attempts() {
        assert_eq!(backoff_millis(15), 2000);
        assert_eq!(backoff_millis(16), 4000);
        assert_eq!(backoff_millis(31), 4000);
        assert_eq!(backoff_millis(32), 6000);
    }

    #[test]
    fn backoff_saturates_at_fifteen_seconds() {
        assert_eq!(backoff_millis(1000), 15_000);
    }
}
