//! Watch notifications feeding the expectation tracker.
//!
//! The owned-object watch streams are inspected before the controller
//! consumes them. Each confirmed create or delete of a managed pod or
//! service counts down the owning cluster's expectations, and the end of
//! every initial list marks that cache as synced.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use tracing::{debug, trace};

use crate::controller::expectations::{ExpectationTracker, ObservedChange};
use crate::crd::TidbCluster;
use crate::resources::common::ClusterKey;

/// Shared flag raised once a watch has delivered its initial list.
#[derive(Clone, Debug, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Translates watch events of one managed kind into expectation updates.
///
/// A UID is counted as added the first time it is seen and as deleted when
/// its `Delete` arrives. After a relist, UIDs that were known but are no
/// longer listed count as deleted, since their `Delete` was missed.
pub struct WatchObserver {
    expectations: Arc<ExpectationTracker>,
    seen: HashMap<String, ClusterKey>,
    relist: Option<HashSet<String>>,
    synced: SyncFlag,
}

impl WatchObserver {
    pub fn new(expectations: Arc<ExpectationTracker>, synced: SyncFlag) -> Self {
        Self {
            expectations,
            seen: HashMap::new(),
            relist: None,
            synced,
        }
    }

    pub fn observe<K: Resource>(&mut self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(uid) = obj.uid()
                    && let Some(relist) = self.relist.as_mut()
                {
                    relist.insert(uid);
                }
                self.applied(obj);
            }
            watcher::Event::InitDone => {
                if let Some(listed) = self.relist.take() {
                    let missed: Vec<String> = self
                        .seen
                        .keys()
                        .filter(|uid| !listed.contains(*uid))
                        .cloned()
                        .collect();
                    for uid in missed {
                        if let Some(key) = self.seen.remove(&uid) {
                            debug!(cluster = %key, uid = %uid, "Object vanished during relist");
                            self.expectations.observe(&key, ObservedChange::Deleted);
                        }
                    }
                }
                self.synced.set();
            }
            watcher::Event::Apply(obj) => self.applied(obj),
            watcher::Event::Delete(obj) => {
                let Some(key) = owner_key(obj) else {
                    return;
                };
                if let Some(uid) = obj.uid() {
                    self.seen.remove(&uid);
                }
                trace!(cluster = %key, object = %obj.name_any(), "Observed delete");
                self.expectations.observe(&key, ObservedChange::Deleted);
            }
        }
    }

    fn applied<K: Resource>(&mut self, obj: &K) {
        let (Some(key), Some(uid)) = (owner_key(obj), obj.uid()) else {
            return;
        };
        if self.seen.contains_key(&uid) {
            return;
        }
        trace!(cluster = %key, object = %obj.name_any(), "Observed add");
        self.expectations.observe(&key, ObservedChange::Added);
        self.seen.insert(uid, key);
    }

    /// Number of UIDs currently tracked.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

/// Drops expectation records of deleted clusters.
pub struct ClusterObserver {
    expectations: Arc<ExpectationTracker>,
    known: HashSet<ClusterKey>,
    relist: Option<HashSet<ClusterKey>>,
}

impl ClusterObserver {
    pub fn new(expectations: Arc<ExpectationTracker>) -> Self {
        Self {
            expectations,
            known: HashSet::new(),
            relist: None,
        }
    }

    pub fn observe(&mut self, event: &watcher::Event<TidbCluster>) {
        match event {
            watcher::Event::Init => self.relist = Some(HashSet::new()),
            watcher::Event::InitApply(cluster) => {
                let key = ClusterKey::from_resource(cluster);
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key.clone());
                }
                self.known.insert(key);
            }
            watcher::Event::Apply(cluster) => {
                self.known.insert(ClusterKey::from_resource(cluster));
            }
            watcher::Event::InitDone => {
                if let Some(listed) = self.relist.take() {
                    for key in self.known.difference(&listed) {
                        self.expectations.forget(key);
                    }
                    self.known = listed;
                }
            }
            watcher::Event::Delete(cluster) => {
                let key = ClusterKey::from_resource(cluster);
                self.known.remove(&key);
                self.expectations.forget(&key);
            }
        }
    }
}

/// Cluster key of a managed object, from its namespace and instance label.
fn owner_key<K: Resource>(obj: &K) -> Option<ClusterKey> {
    ClusterKey::from_labels(obj.meta().namespace.as_deref(), obj.labels())
}
