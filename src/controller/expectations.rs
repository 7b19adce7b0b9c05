//! Expectation tracking for in-flight creates and deletes.
//!
//! The watch cache trails the API server, so a pass that runs before its
//! predecessor's creates are visible would create them again. Each cluster
//! key holds counters of adds and deletes that were asked for and not yet
//! observed; reconciliation of that key waits until both reach zero or the
//! record outlives its TTL.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::resources::common::ClusterKey;

/// Default lifetime of an unsatisfied expectation.
pub const DEFAULT_EXPECTATION_TTL: Duration = Duration::from_secs(300);

/// A confirmed change delivered by the watch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedChange {
    Added,
    Deleted,
}

#[derive(Debug, Clone)]
struct ExpectationRecord {
    pending_adds: i64,
    pending_deletes: i64,
    created_at: Instant,
}

impl ExpectationRecord {
    fn fulfilled(&self) -> bool {
        self.pending_adds <= 0 && self.pending_deletes <= 0
    }
}

/// Keyed store of pending-add and pending-delete counters.
#[derive(Debug)]
pub struct ExpectationTracker {
    records: Mutex<HashMap<ClusterKey, ExpectationRecord>>,
    ttl: Duration,
}

impl Default for ExpectationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTATION_TTL)
    }
}

impl ExpectationTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record intent to create `adds` and delete `deletes` objects for `key`.
    ///
    /// Replaces any earlier record and restarts its TTL.
    pub fn expect(&self, key: &ClusterKey, adds: usize, deletes: usize) {
        let record = ExpectationRecord {
            pending_adds: i64::try_from(adds).unwrap_or(i64::MAX),
            pending_deletes: i64::try_from(deletes).unwrap_or(i64::MAX),
            created_at: Instant::now(),
        };
        debug!(cluster = %key, adds, deletes, "Setting expectations");
        self.records.lock().insert(key.clone(), record);
    }

    /// Count down one confirmed add or delete. Counters never go below zero.
    pub fn observe(&self, key: &ClusterKey, change: ObservedChange) {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(key) else {
            return;
        };
        let counter = match change {
            ObservedChange::Added => &mut record.pending_adds,
            ObservedChange::Deleted => &mut record.pending_deletes,
        };
        *counter = (*counter - 1).max(0);
    }

    /// Whether a reconciliation of `key` may run.
    pub fn satisfied(&self, key: &ClusterKey) -> bool {
        let records = self.records.lock();
        let Some(record) = records.get(key) else {
            return true;
        };
        if record.fulfilled() {
            return true;
        }
        if record.created_at.elapsed() >= self.ttl {
            info!(
                cluster = %key,
                pending_adds = record.pending_adds,
                pending_deletes = record.pending_deletes,
                "Expectations expired without being observed"
            );
            return true;
        }
        false
    }

    /// Drop the record for a deleted cluster.
    pub fn forget(&self, key: &ClusterKey) {
        if self.records.lock().remove(key).is_some() {
            debug!(cluster = %key, "Forgot expectations");
        }
    }

    /// Outstanding (adds, deletes) for `key`.
    pub fn pending(&self, key: &ClusterKey) -> Option<(i64, i64)> {
        self.records
            .lock()
            .get(key)
            .map(|r| (r.pending_adds, r.pending_deletes))
    }

    /// Time left before an unsatisfied record for `key` expires.
    pub fn time_until_expiry(&self, key: &ClusterKey) -> Option<Duration> {
        self.records
            .lock()
            .get(key)
            .filter(|r| !r.fulfilled())
            .map(|r| self.ttl.saturating_sub(r.created_at.elapsed()))
    }
}
