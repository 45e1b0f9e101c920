//! src/metrics.rs
//!
//! Per-Host error accounting: a reset-on-read error counter with a
//! substring exclusion list, and the exponential moving average used to
//! convert a run of proxy errors into a single `TooManyProxyError`.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A counter of errors with a reset-on-read getter, plus an exclusion
/// list applied by substring match against the error's human-readable
/// text.
#[derive(Debug, Default)]
pub struct Metric {
    inner: Mutex<MetricInner>,
}

#[derive(Debug, Default)]
struct MetricInner {
    errors: u64,
    exclude: Vec<String>,
}

impl Metric {
    pub fn new(exclude: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(MetricInner { errors: 0, exclude }),
        }
    }

    /// Increments the error counter unless `error_text` contains one of
    /// the excluded substrings.
    pub fn record(&self, error_text: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.exclude.iter().any(|s| error_text.contains(s.as_str())) {
            return;
        }
        inner.errors += 1;
    }

    /// Returns the current error count and resets it to zero.
    pub fn get_and_reset(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.errors;
        inner.errors = 0;
        count
    }
}

/// Configuration for a `MovingAvg`: the exponential smoothing window and
/// the cutoff above which the average is considered "tripped".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovingAvgParams {
    /// Smoothing factor in (0, 1]; higher weighs recent samples more.
    pub alpha: f64,
    pub cutoff: f64,
}

impl Default for MovingAvgParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            cutoff: 0.5,
        }
    }
}

/// An exponential moving average over a stream of Bernoulli trials (1.0 =
/// error occurred, 0.0 = it didn't), used to smooth proxy-error bursts
/// into a single rate and trip a cutoff once that rate climbs too high.
#[derive(Debug)]
pub struct MovingAvg {
    params: MovingAvgParams,
    value: Mutex<f64>,
}

impl MovingAvg {
    pub fn new(params: MovingAvgParams) -> Self {
        Self {
            params,
            value: Mutex::new(0.0),
        }
    }

    /// Feeds one trial into the average and reports whether the cutoff is
    /// currently tripped.
    pub fn record(&self, sample: f64) -> bool {
        let mut value = self.value.lock().unwrap();
        *value = self.params.alpha * sample + (1.0 - self.params.alpha) * *value;
        *value >= self.params.cutoff
    }

    pub fn current(&self) -> f64 {
        *self.value.lock().unwrap()
    }
}
