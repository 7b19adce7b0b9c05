//! Common resource generation utilities.
//!
//! Identity labels, owner references, object naming and cluster keys shared by
//! the pod and service composers and by the watch-notification path.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{TidbCluster, TierKind};

/// Value of the managed-by label on every object this operator creates.
pub const MANAGED_BY: &str = "tidb-operator";
/// Value of the app name label on every managed object.
pub const APP_NAME: &str = "tidb-cluster";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_REPLICA_INDEX: &str = "tidb.kubetidb.io/replica-index";

/// Work-queue key of a cluster: `namespace/name`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a TidbCluster object.
    pub fn from_resource(cluster: &TidbCluster) -> Self {
        Self::new(cluster.namespace().unwrap_or_default(), cluster.name_any())
    }

    /// Key of the cluster owning a managed object, read from its labels.
    pub fn from_labels(
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Option<Self> {
        if labels.get(LABEL_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY) {
            return None;
        }
        let name = labels.get(LABEL_INSTANCE)?;
        Some(Self::new(namespace.unwrap_or_default(), name.clone()))
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ClusterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!("invalid cluster key {s:?}, expected namespace/name")),
        }
    }
}

/// Owner identity threaded through composition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterIdentity {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl ClusterIdentity {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.into(),
        }
    }

    pub fn from_resource(cluster: &TidbCluster) -> Self {
        Self::new(
            cluster.name_any(),
            cluster.namespace().unwrap_or_default(),
            cluster.uid().unwrap_or_default(),
        )
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Controller owner reference; garbage collection cascades through it.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: TidbCluster::api_version(&()).to_string(),
            kind: TidbCluster::kind(&()).to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Name shared by the pod and the service of one replica.
pub fn instance_name(cluster: &str, tier: TierKind, index: u32) -> String {
    format!("{}-{}-{}", cluster, tier.lowercase(), index)
}

/// Key used in `status.instanceStatus`.
pub fn instance_status_key(tier: TierKind, index: u32) -> String {
    format!("{}-{}", tier.lowercase(), index)
}

/// DNS name of a replica's service.
pub fn service_host(identity: &ClusterIdentity, tier: TierKind, index: u32) -> String {
    format!(
        "{}.{}.svc",
        instance_name(&identity.name, tier, index),
        identity.namespace
    )
}

/// Labels applied to every object of one replica.
pub fn identity_labels(cluster: &str, tier: TierKind, index: u32) -> BTreeMap<String, String> {
    let mut labels = selector_labels(cluster, tier, index);
    labels.insert(LABEL_NAME.to_string(), APP_NAME.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels
}

/// Labels a replica's service selects its pod by.
pub fn selector_labels(cluster: &str, tier: TierKind, index: u32) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_INSTANCE.to_string(), cluster.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), tier.lowercase().to_string());
    labels.insert(LABEL_REPLICA_INDEX.to_string(), index.to_string());
    labels
}

/// Label selector matching every object managed by this operator.
pub fn managed_label_selector() -> String {
    format!("{LABEL_MANAGED_BY}={MANAGED_BY}")
}

/// Tier and replica index carried by a managed object's labels.
pub fn parse_replica_labels(labels: &BTreeMap<String, String>) -> Option<(TierKind, u32)> {
    let tier = TierKind::from_lowercase(labels.get(LABEL_COMPONENT)?)?;
    let index = labels.get(LABEL_REPLICA_INDEX)?.parse::<u32>().ok()?;
    Some((tier, index))
}
