//! Observed managed objects, parsed from the watch cache.
//!
//! Identity is taken from labels only. Objects without a parsable owner,
//! tier or replica index are not managed by this operator and are skipped.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use tracing::debug;

use crate::crd::TierKind;
use crate::resources::common::{ClusterKey, parse_replica_labels};
use crate::resources::services::service_selector;

/// A pod owned by a cluster, identified by (cluster, tier, replica index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPod {
    pub cluster: ClusterKey,
    pub tier: TierKind,
    pub index: u32,
    pub name: String,
    pub creation_time: Option<String>,
    pub phase: Option<String>,
    pub terminating: bool,
}

impl ManagedPod {
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let labels = pod.labels();
        let cluster = ClusterKey::from_labels(pod.metadata.namespace.as_deref(), labels)?;
        let Some((tier, index)) = parse_replica_labels(labels) else {
            debug!(pod = %pod.name_any(), "Skipping pod without replica identity labels");
            return None;
        };
        Some(Self {
            cluster,
            tier,
            index,
            name: pod.name_any(),
            creation_time: pod
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_string()),
            phase: pod.status.as_ref().and_then(|s| s.phase.clone()),
            terminating: pod.metadata.deletion_timestamp.is_some(),
        })
    }

    /// Status string reported in `status.instanceStatus`.
    pub fn status_string(&self) -> String {
        if self.terminating {
            "Terminating".to_string()
        } else {
            self.phase.clone().unwrap_or_else(|| "Unknown".to_string())
        }
    }
}

/// A per-replica service owned by a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedService {
    pub cluster: ClusterKey,
    pub tier: TierKind,
    pub index: u32,
    pub name: String,
    /// DNS host the service resolves at.
    pub address: String,
    pub selector: BTreeMap<String, String>,
}

impl ManagedService {
    pub fn from_service(service: &Service) -> Option<Self> {
        let labels = service.labels();
        let cluster = ClusterKey::from_labels(service.metadata.namespace.as_deref(), labels)?;
        let Some((tier, index)) = parse_replica_labels(labels) else {
            debug!(service = %service.name_any(), "Skipping service without replica identity labels");
            return None;
        };
        let name = service.name_any();
        Some(Self {
            address: format!("{}.{}.svc", name, cluster.namespace),
            cluster,
            tier,
            index,
            name,
            selector: service_selector(service).cloned().unwrap_or_default(),
        })
    }
}

/// Everything the cache currently holds for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedObjects {
    pub pods: Vec<ManagedPod>,
    pub services: Vec<ManagedService>,
}

impl ObservedObjects {
    /// Parse raw objects, keeping only those owned by `key`.
    pub fn collect<'a>(
        key: &ClusterKey,
        pods: impl IntoIterator<Item = &'a Pod>,
        services: impl IntoIterator<Item = &'a Service>,
    ) -> Self {
        let mut pods: Vec<ManagedPod> = pods
            .into_iter()
            .filter_map(ManagedPod::from_pod)
            .filter(|p| &p.cluster == key)
            .collect();
        let mut services: Vec<ManagedService> = services
            .into_iter()
            .filter_map(ManagedService::from_service)
            .filter(|s| &s.cluster == key)
            .collect();
        pods.sort_by(|a, b| (a.tier, a.index, &a.name).cmp(&(b.tier, b.index, &b.name)));
        services.sort_by(|a, b| (a.tier, a.index, &a.name).cmp(&(b.tier, b.index, &b.name)));
        Self { pods, services }
    }

    pub fn pods_in(&self, tier: TierKind) -> impl Iterator<Item = &ManagedPod> {
        self.pods.iter().filter(move |p| p.tier == tier)
    }

    pub fn services_in(&self, tier: TierKind) -> impl Iterator<Item = &ManagedService> {
        self.services.iter().filter(move |s| s.tier == tier)
    }

    /// Total managed pods across every tier.
    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }
}
