//! Per-key exponential requeue backoff.
//!
//! Failed passes of the same cluster back off as `base * 2^failures`, capped.
//! A successful pass resets the key.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::resources::common::ClusterKey;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct RequeueBackoff {
    failures: Mutex<HashMap<ClusterKey, u32>>,
    base: Duration,
    cap: Duration,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl RequeueBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base,
            cap,
        }
    }

    /// Record a failure of `key` and return the delay before its next attempt.
    pub fn next_delay(&self, key: &ClusterKey) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = (*count).min(31);
        *count = count.saturating_add(1);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Number of consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ClusterKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    pub fn reset(&self, key: &ClusterKey) {
        self.failures.lock().remove(key);
    }
}
