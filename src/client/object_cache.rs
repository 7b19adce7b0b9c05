//! Object cache over the pod and service reflector stores.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::reflector::Store;

use crate::client::ObjectCache;
use crate::controller::notifications::SyncFlag;
use crate::planner::ObservedObjects;
use crate::resources::common::ClusterKey;

/// Reads pods and services from the reflectors feeding the controller's
/// owned-object watches.
#[derive(Clone)]
pub struct ReflectorCache {
    pods: Store<Pod>,
    services: Store<Service>,
    pods_synced: SyncFlag,
    services_synced: SyncFlag,
}

impl ReflectorCache {
    pub fn new(
        pods: Store<Pod>,
        services: Store<Service>,
        pods_synced: SyncFlag,
        services_synced: SyncFlag,
    ) -> Self {
        Self {
            pods,
            services,
            pods_synced,
            services_synced,
        }
    }
}

impl ObjectCache for ReflectorCache {
    fn list_by_owner(&self, key: &ClusterKey) -> ObservedObjects {
        let pods = self.pods.state();
        let services = self.services.state();
        ObservedObjects::collect(
            key,
            pods.iter().map(|p| p.as_ref()),
            services.iter().map(|s| s.as_ref()),
        )
    }

    fn has_synced(&self) -> bool {
        self.pods_synced.is_set() && self.services_synced.is_set()
    }
}
