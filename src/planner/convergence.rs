//! Tier convergence planning - computes what needs to change, no I/O.
//!
//! Compares a tier's desired replica count with the pods and services
//! observed for it and emits the corrective tasks. Replica identity is the
//! index label, never the position of an object in the observed list.

use std::collections::{BTreeMap, BTreeSet};

use crate::crd::{TierKind, TierSpec};
use crate::planner::observed::{ManagedPod, ManagedService};
use crate::planner::tasks::{Task, TaskKind};
use crate::resources::common::ClusterIdentity;
use crate::resources::{ComposeError, compose_pod, compose_service};

/// Outcome of planning one tier.
#[derive(Debug, Clone, PartialEq)]
pub enum TierPlan {
    /// Corrective tasks, possibly none.
    Tasks(Vec<Task>),
    /// Nothing can be planned this pass. Carries zero tasks.
    Blocked(ComposeError),
}

impl TierPlan {
    pub fn tasks(&self) -> &[Task] {
        match self {
            TierPlan::Tasks(tasks) => tasks,
            TierPlan::Blocked(_) => &[],
        }
    }

    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            TierPlan::Tasks(tasks) => tasks,
            TierPlan::Blocked(_) => Vec::new(),
        }
    }

    /// The tier needs nothing: every desired replica exists and no surplus remains.
    pub fn is_converged(&self) -> bool {
        matches!(self, TierPlan::Tasks(tasks) if tasks.is_empty())
    }

    pub fn is_dependency_not_ready(&self) -> bool {
        matches!(
            self,
            TierPlan::Blocked(ComposeError::DependencyNotReady { .. })
        )
    }

    /// Number of planned tasks of one kind.
    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks().iter().filter(|t| t.kind() == kind).count()
    }
}

/// Plan one tier.
///
/// Missing indices in `[0, replicas)` get a `CreateService` (when no service
/// exists for the index) and a `CreatePod` (when no pod does). Objects at
/// indices at or above the desired count are deleted from the highest index
/// down, so the founding members stay stable. Objects of other tiers in the
/// observed lists are ignored.
pub fn plan(
    tier: &TierSpec,
    identity: &ClusterIdentity,
    observed_pods: &[ManagedPod],
    observed_services: &[ManagedService],
    dependency_addresses: &[String],
) -> TierPlan {
    let desired = u32::try_from(tier.replicas).unwrap_or(0);

    if desired > 0
        && let Some(dependency) = tier.kind.dependency()
        && dependency_addresses.is_empty()
    {
        return TierPlan::Blocked(ComposeError::DependencyNotReady {
            tier: tier.kind,
            dependency,
        });
    }

    let pods = by_index(
        observed_pods.iter().filter(|p| p.tier == tier.kind),
        |p| p.index,
    );
    let services = by_index(
        observed_services.iter().filter(|s| s.tier == tier.kind),
        |s| s.index,
    );

    let mut tasks = Vec::new();

    for index in 0..desired {
        if !services.contains_key(&index) {
            tasks.push(Task::CreateService {
                tier: tier.kind,
                index,
                service: Box::new(compose_service(identity, tier.kind, index)),
            });
        }
        if !pods.contains_key(&index) {
            match compose_pod(identity, tier, index, dependency_addresses) {
                Ok(template) => tasks.push(Task::CreatePod {
                    tier: tier.kind,
                    index,
                    template: Box::new(template),
                }),
                Err(e) => return TierPlan::Blocked(e),
            }
        }
    }

    let surplus: BTreeSet<u32> = pods
        .keys()
        .chain(services.keys())
        .copied()
        .filter(|index| *index >= desired)
        .collect();

    for index in surplus.into_iter().rev() {
        for pod in pods.get(&index).into_iter().flatten() {
            if !pod.terminating {
                tasks.push(Task::DeletePod {
                    tier: tier.kind,
                    index,
                    name: pod.name.clone(),
                });
            }
        }
        for service in services.get(&index).into_iter().flatten() {
            tasks.push(Task::DeleteService {
                tier: tier.kind,
                index,
                name: service.name.clone(),
            });
        }
    }

    TierPlan::Tasks(tasks)
}

/// Group observed objects by replica index.
fn by_index<'a, T>(
    items: impl Iterator<Item = &'a T>,
    index: impl Fn(&T) -> u32,
) -> BTreeMap<u32, Vec<&'a T>> {
    let mut grouped: BTreeMap<u32, Vec<&'a T>> = BTreeMap::new();
    for item in items {
        grouped.entry(index(item)).or_default().push(item);
    }
    grouped
}

/// Client addresses of the dependency tier, resolved from its observed
/// services with an index below its desired count, in index order.
pub fn dependency_addresses(
    desired: i32,
    observed_services: &[ManagedService],
    dependency: TierKind,
    render: impl Fn(&str) -> String,
) -> Vec<String> {
    let desired = u32::try_from(desired).unwrap_or(0);
    let hosts: BTreeMap<u32, &str> = observed_services
        .iter()
        .filter(|s| s.tier == dependency && s.index < desired)
        .map(|s| (s.index, s.address.as_str()))
        .collect();
    hosts.values().map(|host| render(host)).collect()
}
