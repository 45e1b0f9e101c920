//! src/host/cooloff.rs
//!
//! Leaky-bucket rate limiter gating connect attempts once a Host has
//! failed to connect too many times in a row. Hand-rolled rather than
//! pulled from a crate: it is a single small stateful counter, and the
//! teacher's own code favors small hand-rolled structs for leaf concerns
//! like this one (see DESIGN.md).

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    remaining: u32,
    capacity: u32,
    refill_interval: Duration,
    drained_at: Option<Instant>,
}

/// Capacity `NumSendsBeforeCoolOff + 1`; one unit consumed per connect
/// *failure*; the bucket fully refills `refill_interval` after it was
/// drained to zero.
pub struct CoolOffBucket {
    state: Mutex<BucketState>,
}

impl CoolOffBucket {
    pub fn new(num_sends_before_cool_off: u32, refill_interval: Duration) -> Self {
        let capacity = num_sends_before_cool_off + 1;
        Self {
            state: Mutex::new(BucketState {
                remaining: capacity,
                capacity,
                refill_interval,
                drained_at: None,
            }),
        }
    }

    /// True if connect attempts should be refused right now without
    /// dialing.
    pub fn in_cool_off(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::maybe_refill(&mut state);
        state.remaining == 0
    }

    /// Consumes one unit on a connect failure. Returns true if this call
    /// drained the bucket (entering cool-off).
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::maybe_refill(&mut state);
        if state.remaining > 0 {
            state.remaining -= 1;
        }
        if state.remaining == 0 && state.drained_at.is_none() {
            state.drained_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// A successful connect resets the bucket to full capacity.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.remaining = state.capacity;
        state.drained_at = None;
    }

    fn maybe_refill(state: &mut BucketState) {
        if let Some(drained_at) = state.drained_at {
            if drained_at.elapsed() >= state.refill_interval {
                state.remaining = state.capacity;
                state.drained_at = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_up_to_capacity_failures() {
        let bucket = CoolOffBucket::new(2, Duration::from_secs(60));
        assert!(!bucket.record_failure());
        assert!(!bucket.record_failure());
        assert!(!bucket.in_cool_off());
        assert!(bucket.record_failure()); // third failure drains capacity=3
        assert!(bucket.in_cool_off());
    }

    #[test]
    fn success_resets_the_bucket() {
        let bucket = CoolOffBucket::new(1, Duration::from_secs(60));
        assert!(bucket.record_failure());
        assert!(bucket.in_cool_off());
        bucket.record_success();
        assert!(!bucket.in_cool_off());
    }

    #[test]
    fn bucket_refills_after_timeout_elapses() {
        let bucket = CoolOffBucket::new(0, Duration::from_millis(20));
        assert!(bucket.record_failure());
        assert!(bucket.in_cool_off());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!bucket.in_cool_off());
    }
}
