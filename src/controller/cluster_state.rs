//! Derived cluster state.
//!
//! The state is recomputed from observed objects on every pass. The phase
//! persisted in status reports it and is never read back as input.

use crate::crd::{ClusterState, TidbClusterSpec, TierKind};
use crate::planner::ObservedObjects;

/// Observed progress of one tier towards its desired count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierProgress {
    pub kind: TierKind,
    pub desired: u32,
    /// Pods at an index below `desired`, terminating ones excluded.
    pub pods_in_range: u32,
    pub services_in_range: u32,
    /// Pods or services at an index at or above `desired`.
    pub surplus: u32,
}

impl TierProgress {
    pub fn observe(kind: TierKind, desired: i32, observed: &ObservedObjects) -> Self {
        let desired = u32::try_from(desired).unwrap_or(0);
        let mut pod_indices: Vec<u32> = observed
            .pods_in(kind)
            .filter(|p| p.index < desired && !p.terminating)
            .map(|p| p.index)
            .collect();
        pod_indices.dedup();
        let mut service_indices: Vec<u32> = observed
            .services_in(kind)
            .filter(|s| s.index < desired)
            .map(|s| s.index)
            .collect();
        service_indices.dedup();
        let surplus = observed.pods_in(kind).filter(|p| p.index >= desired).count()
            + observed
                .services_in(kind)
                .filter(|s| s.index >= desired)
                .count();

        Self {
            kind,
            desired,
            pods_in_range: u32::try_from(pod_indices.len()).unwrap_or(u32::MAX),
            services_in_range: u32::try_from(service_indices.len()).unwrap_or(u32::MAX),
            surplus: u32::try_from(surplus).unwrap_or(u32::MAX),
        }
    }

    /// Exactly the desired pods and services exist.
    pub fn is_converged(&self) -> bool {
        self.pods_in_range == self.desired
            && self.services_in_range == self.desired
            && self.surplus == 0
    }
}

/// Progress of every declared tier, in dependency order.
pub fn observe_tiers(spec: &TidbClusterSpec, observed: &ObservedObjects) -> Vec<TierProgress> {
    TierKind::ORDERED
        .iter()
        .filter(|kind| spec.tier(**kind).is_some())
        .map(|kind| TierProgress::observe(*kind, spec.desired_replicas(*kind), observed))
        .collect()
}

/// Derive the state of a cluster whose spec passed validation.
///
/// A cluster that declares no replicas at all and has none is `Running`.
/// `Failed` is never derived here; it is reported for invalid specs only.
pub fn derive_state(observed_pods: usize, tiers: &[TierProgress]) -> ClusterState {
    let wants_pods = tiers.iter().any(|t| t.desired > 0);
    if observed_pods == 0 && wants_pods {
        return ClusterState::Pending;
    }
    let metadata_ready = tiers
        .iter()
        .filter(|t| t.kind == TierKind::Metadata)
        .all(TierProgress::is_converged);
    if !metadata_ready {
        return ClusterState::Provisioning;
    }
    if tiers.iter().all(TierProgress::is_converged) {
        ClusterState::Running
    } else {
        ClusterState::Converging
    }
}
