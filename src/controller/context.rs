//! Shared context for the controller.
//!
//! The Context struct holds everything a reconciliation pass needs: the
//! collaborator seams, the expectation tracker, the per-key backoff and the
//! optional health state.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType};

use crate::client::{ClusterStore, EventSink, ObjectCache, PodControl, ServiceControl};
use crate::controller::backoff::RequeueBackoff;
use crate::controller::expectations::ExpectationTracker;
use crate::crd::TidbCluster;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "tidb-operator";

/// Default interval between passes of a steady cluster.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Retry delay while the object caches are still listing.
pub const DEFAULT_CACHE_SYNC_RETRY: Duration = Duration::from_secs(1);

/// The external systems a pass reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn ObjectCache>,
    pub clusters: Arc<dyn ClusterStore>,
    pub pods: Arc<dyn PodControl>,
    pub services: Arc<dyn ServiceControl>,
    pub events: Arc<dyn EventSink>,
}

/// Timing knobs of the reconciler.
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    pub resync_interval: Duration,
    pub cache_sync_retry: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            cache_sync_retry: DEFAULT_CACHE_SYNC_RETRY,
        }
    }
}

/// Shared context for the controller
pub struct Context {
    pub collaborators: Collaborators,
    /// Shared with the watch observers
    pub expectations: Arc<ExpectationTracker>,
    pub backoff: RequeueBackoff,
    pub settings: ReconcilerSettings,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        collaborators: Collaborators,
        expectations: Arc<ExpectationTracker>,
        settings: ReconcilerSettings,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            collaborators,
            expectations,
            backoff: RequeueBackoff::default(),
            settings,
            health_state,
        }
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &TidbCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(cluster, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &TidbCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(cluster, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish(
        &self,
        cluster: &TidbCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.into(),
            note,
            action: action.into(),
            secondary: None,
        };
        self.collaborators.events.publish(cluster, event).await;
    }
}
