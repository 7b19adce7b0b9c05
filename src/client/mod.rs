//! Collaborator seams between the reconciler and the Kubernetes API.
//!
//! The reconciler only talks to these traits. Each has a kube-backed
//! implementation; tests substitute in-memory or mocked ones.
//!
//! ## Architecture
//!
//! - `object_cache`: Reflector-backed read of a cluster's pods and services
//! - `cluster_store`: Cached read and optimistic status writes of `TidbCluster`
//! - `pod_control`: Idempotent pod create/delete
//! - `service_control`: Idempotent service create/delete/patch
//! - `events`: Kubernetes event publishing

pub mod cluster_store;
pub mod events;
pub mod object_cache;
pub mod pod_control;
pub mod service_control;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::events::Event;
#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{TidbCluster, TidbClusterStatus};
use crate::planner::ObservedObjects;
use crate::resources::common::ClusterKey;

pub use cluster_store::KubeClusterStore;
pub use events::KubeEventSink;
pub use object_cache::ReflectorCache;
pub use pod_control::KubePodControl;
pub use service_control::KubeServiceControl;

/// Locally cached, eventually consistent view of managed objects.
#[cfg_attr(test, automock)]
pub trait ObjectCache: Send + Sync {
    /// Pods and services owned by the cluster.
    fn list_by_owner(&self, key: &ClusterKey) -> ObservedObjects;

    /// Whether the initial list of every watched kind has been delivered.
    fn has_synced(&self) -> bool;
}

/// Declared-state store for TidbCluster objects.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Latest cached copy of the cluster, `None` once it is deleted.
    fn get(&self, key: &ClusterKey) -> Option<Arc<TidbCluster>>;

    /// Replace the status subresource wholesale.
    ///
    /// When `resource_version` is given the write is rejected with
    /// [`Error::Conflict`] if the object changed since it was read.
    async fn update_status(
        &self,
        key: &ClusterKey,
        status: &TidbClusterStatus,
        resource_version: Option<String>,
    ) -> Result<()>;
}

/// Pod client. "Already exists" and "already gone" are success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodControl: Send + Sync {
    async fn create_pod(&self, namespace: &str, template: &PodTemplateSpec) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Service client. "Already exists" and "already gone" are success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace an existing service's selector with the one on `service`.
    async fn patch_service(&self, namespace: &str, name: &str, service: &Service) -> Result<()>;
}

/// Destination for Kubernetes events about a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, cluster: &TidbCluster, event: Event);
}

/// Check that a controller reference can be used to own a new object.
pub fn validate_controller_ref(owner: &OwnerReference) -> Result<()> {
    if owner.api_version.is_empty() {
        return Err(Error::InvalidControllerRef("apiVersion is empty".to_string()));
    }
    if owner.kind.is_empty() {
        return Err(Error::InvalidControllerRef("kind is empty".to_string()));
    }
    if owner.name.is_empty() {
        return Err(Error::InvalidControllerRef("name is empty".to_string()));
    }
    if owner.uid.is_empty() {
        return Err(Error::InvalidControllerRef("uid is empty".to_string()));
    }
    if owner.controller != Some(true) {
        return Err(Error::InvalidControllerRef("controller must be true".to_string()));
    }
    if owner.block_owner_deletion != Some(true) {
        return Err(Error::InvalidControllerRef(
            "blockOwnerDeletion must be true".to_string(),
        ));
    }
    Ok(())
}

/// Pre-create checks shared by the pod and service clients: identity labels
/// must be present and the object must carry a valid controller reference.
pub fn check_owned_metadata(metadata: &ObjectMeta, what: &str) -> Result<()> {
    if metadata.labels.as_ref().is_none_or(|l| l.is_empty()) {
        return Err(Error::MissingLabels(what.to_string()));
    }
    let owner = metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true))
        .ok_or_else(|| Error::InvalidControllerRef(format!("{what} has no controller")))?;
    validate_controller_ref(owner)
}
