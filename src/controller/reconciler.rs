//! Reconciliation loop for TidbCluster.
//!
//! A pass reads the declared cluster and the cached pods and services it
//! owns, plans each tier in dependency order, dispatches the resulting
//! tasks and reports the derived state in status. Nothing carried between
//! passes is authoritative except the expectation records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::cluster_state::{derive_state, observe_tiers};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::expectations::ObservedChange;
use crate::controller::status::{REASON_SPEC_INVALID, build_status, failed_status};
use crate::controller::validation::{declared_tiers, validate_spec};
use crate::crd::{ClusterState, TidbCluster, TierKind};
use crate::planner::{ObservedObjects, Task, TaskKind, TierPlan, dependency_addresses, plan};
use crate::resources::common::{ClusterIdentity, ClusterKey};
use crate::resources::{ComposeError, compose_service};
use crate::resources::pods::metadata_client_address;
use crate::resources::services::service_selector;

/// Why a pass ended before planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The cluster is gone or being deleted.
    ClusterGone,
    /// The pod or service cache has not finished its initial list.
    CacheNotSynced,
    /// Creates or deletes from an earlier pass are not yet observed.
    ExpectationsPending,
}

/// A task planned during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedTask {
    pub tier: TierKind,
    pub kind: TaskKind,
    pub index: u32,
}

/// What a pass did.
#[derive(Clone, Debug)]
pub struct SyncOutcome {
    pub state: Option<ClusterState>,
    pub skipped: Option<SkipReason>,
    pub planned: Vec<PlannedTask>,
    /// Tiers that could not be planned because a dependency has no addresses.
    pub blocked: Vec<TierKind>,
    pub dispatched: usize,
    pub repaired: usize,
    pub action: Action,
}

impl SyncOutcome {
    fn skipped(reason: SkipReason, action: Action) -> Self {
        Self {
            state: None,
            skipped: Some(reason),
            planned: Vec::new(),
            blocked: Vec::new(),
            dispatched: 0,
            repaired: 0,
            action,
        }
    }

    /// Number of planned tasks of one kind in one tier.
    pub fn planned_count(&self, tier: TierKind, kind: TaskKind) -> usize {
        self.planned
            .iter()
            .filter(|t| t.tier == tier && t.kind == kind)
            .count()
    }

    /// Tiers that had at least one task planned.
    pub fn planned_tiers(&self) -> Vec<TierKind> {
        let mut tiers: Vec<TierKind> = self.planned.iter().map(|t| t.tier).collect();
        tiers.dedup();
        tiers
    }
}

/// Reconcile a TidbCluster
///
/// This is the function the controller calls for each queued key.
pub async fn reconcile(obj: Arc<TidbCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let key = ClusterKey::from_resource(&obj);

    debug!(cluster = %key, "Reconciling TidbCluster");

    let result = sync_cluster(&key, &ctx).await;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            &key.namespace,
            &key.name,
            start_time.elapsed().as_secs_f64(),
        );
    }

    let outcome = result?;
    ctx.backoff.reset(&key);
    Ok(outcome.action)
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<TidbCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ClusterKey::from_resource(&obj);

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&key.namespace, &key.name);
    }

    if error.is_not_found() {
        debug!(cluster = %key, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(
            cluster = %key,
            error = %error,
            failures = ctx.backoff.failures(&key),
            delay_secs = delay.as_secs_f64(),
            "Retryable error, will retry"
        );
        Action::requeue(delay)
    } else {
        error!(cluster = %key, error = %error, "Non-retryable error");
        Action::requeue(error.requeue_after())
    }
}

/// Run one reconciliation pass for `key`.
pub async fn sync_cluster(key: &ClusterKey, ctx: &Context) -> Result<SyncOutcome> {
    let collaborators = &ctx.collaborators;

    let Some(cluster) = collaborators.clusters.get(key) else {
        debug!(cluster = %key, "Cluster is gone, dropping expectations");
        forget_cluster(key, ctx);
        return Ok(SyncOutcome::skipped(
            SkipReason::ClusterGone,
            Action::await_change(),
        ));
    };
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!(cluster = %key, "Cluster is being deleted, leaving cleanup to garbage collection");
        forget_cluster(key, ctx);
        return Ok(SyncOutcome::skipped(
            SkipReason::ClusterGone,
            Action::await_change(),
        ));
    }
    if !collaborators.cache.has_synced() {
        debug!(cluster = %key, "Object caches not synced yet");
        return Ok(SyncOutcome::skipped(
            SkipReason::CacheNotSynced,
            Action::requeue(ctx.settings.cache_sync_retry),
        ));
    }

    let previous = cluster.status.as_ref();
    let generation = cluster.metadata.generation;

    if let Err(e) = validate_spec(&cluster.spec) {
        return report_invalid_spec(key, &cluster, ctx, &e).await;
    }

    if !ctx.expectations.satisfied(key) {
        let wait = ctx
            .expectations
            .time_until_expiry(key)
            .unwrap_or(ctx.settings.resync_interval)
            .max(Duration::from_millis(100));
        debug!(
            cluster = %key,
            pending = ?ctx.expectations.pending(key),
            wait_secs = wait.as_secs_f64(),
            "Expectations pending, skipping pass"
        );
        if let Some(ref health_state) = ctx.health_state {
            health_state
                .metrics
                .record_expectation_skip(&key.namespace, &key.name);
        }
        return Ok(SyncOutcome::skipped(
            SkipReason::ExpectationsPending,
            Action::requeue(wait),
        ));
    }

    let identity = ClusterIdentity::from_resource(&cluster);
    let observed = collaborators.cache.list_by_owner(key);

    let (tasks, blocked) = plan_cluster(&cluster, &identity, &observed)?;
    let planned: Vec<PlannedTask> = tasks
        .iter()
        .map(|t| PlannedTask {
            tier: t.tier(),
            kind: t.kind(),
            index: t.replica_index(),
        })
        .collect();

    let (repaired, repair_failures) = repair_services(key, &cluster, &identity, &observed, ctx).await;
    let total = tasks.len() + repaired + repair_failures;
    let failed = dispatch(key, &cluster, tasks, ctx).await + repair_failures;

    let tiers = observe_tiers(&cluster.spec, &observed);
    let state = derive_state(observed.pod_count(), &tiers);
    let status = build_status(previous, state, &observed, &tiers, generation);
    if previous != Some(&status) {
        if previous.and_then(|s| s.state) != Some(state) {
            info!(cluster = %key, state = %state, phase = %state.phase(), "Cluster state changed");
        }
        collaborators
            .clusters
            .update_status(key, &status, cluster.resource_version())
            .await?;
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_phase(&key.namespace, &key.name, state.phase());
        for tier in &tiers {
            health_state.metrics.set_tier_replicas(
                &key.namespace,
                &key.name,
                tier.kind,
                i64::from(tier.desired),
                i64::from(tier.pods_in_range),
            );
        }
    }

    if failed > 0 {
        return Err(Error::Dispatch { failed, total });
    }

    if !blocked.is_empty() {
        debug!(cluster = %key, blocked = ?blocked, "Tiers waiting for dependencies");
    }

    Ok(SyncOutcome {
        state: Some(state),
        skipped: None,
        dispatched: planned.len(),
        planned,
        blocked,
        repaired,
        action: Action::requeue(ctx.settings.resync_interval),
    })
}

/// Plan every declared tier in dependency order.
///
/// Later tiers are only planned once the Metadata tier needs nothing,
/// since they embed its addresses.
fn plan_cluster(
    cluster: &TidbCluster,
    identity: &ClusterIdentity,
    observed: &ObservedObjects,
) -> Result<(Vec<Task>, Vec<TierKind>)> {
    let metadata_addresses = dependency_addresses(
        cluster.spec.desired_replicas(TierKind::Metadata),
        &observed.services,
        TierKind::Metadata,
        metadata_client_address,
    );

    let mut tasks = Vec::new();
    let mut blocked = Vec::new();

    for kind in declared_tiers(&cluster.spec) {
        let Some(tier) = cluster.spec.tier(kind) else {
            continue;
        };
        let deps: &[String] = match kind.dependency() {
            Some(TierKind::Metadata) => &metadata_addresses,
            Some(_) | None => &[],
        };

        let tier_plan = plan(tier, identity, &observed.pods, &observed.services, deps);
        debug!(
            cluster = %identity.key(),
            tier = %kind,
            tasks = tier_plan.tasks().len(),
            "Planned tier"
        );

        match tier_plan {
            TierPlan::Blocked(ComposeError::DependencyNotReady { .. }) => blocked.push(kind),
            TierPlan::Blocked(e) => return Err(e.into()),
            TierPlan::Tasks(tier_tasks) => {
                let converged = tier_tasks.is_empty();
                tasks.extend(tier_tasks);
                if kind == TierKind::Metadata && !converged {
                    break;
                }
            }
        }
    }

    Ok((tasks, blocked))
}

/// Patch in-range services whose selector drifted from the composed one.
///
/// Returns the number of services patched and the number of failed patches.
async fn repair_services(
    key: &ClusterKey,
    cluster: &TidbCluster,
    identity: &ClusterIdentity,
    observed: &ObservedObjects,
    ctx: &Context,
) -> (usize, usize) {
    let mut repaired = 0;
    let mut failed = 0;

    for service in &observed.services {
        let desired = u32::try_from(cluster.spec.desired_replicas(service.tier)).unwrap_or(0);
        if service.index >= desired {
            continue;
        }
        let composed = compose_service(identity, service.tier, service.index);
        if service_selector(&composed) == Some(&service.selector) {
            continue;
        }
        match ctx
            .collaborators
            .services
            .patch_service(&key.namespace, &service.name, &composed)
            .await
        {
            Ok(()) => {
                repaired += 1;
                ctx.publish_normal_event(
                    cluster,
                    "SuccessfulUpdate",
                    "Update",
                    Some(format!("Repaired selector of service {}", service.name)),
                )
                .await;
            }
            Err(e) => {
                failed += 1;
                warn!(cluster = %key, service = %service.name, error = %e, "Failed to repair service");
                ctx.publish_warning_event(
                    cluster,
                    "FailedUpdate",
                    "Update",
                    Some(format!("Failed to repair service {}: {}", service.name, e)),
                )
                .await;
            }
        }
    }

    (repaired, failed)
}

/// Dispatch every task independently and return how many failed.
///
/// Expectations are raised for the whole batch first; each failure lowers
/// them again so the record only counts changes that were actually sent.
async fn dispatch(key: &ClusterKey, cluster: &TidbCluster, tasks: Vec<Task>, ctx: &Context) -> usize {
    if tasks.is_empty() {
        return 0;
    }

    let adds = tasks.iter().filter(|t| t.kind().is_add()).count();
    let deletes = tasks.len() - adds;
    ctx.expectations.expect(key, adds, deletes);

    let mut failed = 0;
    for task in tasks {
        let kind = task.kind();
        let object = task.object_name();
        let result = dispatch_task(&key.namespace, &task, ctx).await;

        let (action, verb) = if kind.is_add() {
            ("Create", "create")
        } else {
            ("Delete", "delete")
        };
        let what = match kind {
            TaskKind::CreatePod | TaskKind::DeletePod => "pod",
            TaskKind::CreateService | TaskKind::DeleteService => "service",
        };

        match result {
            Ok(()) => {
                debug!(cluster = %key, tier = %task.tier(), task = %task, "Dispatched task");
                if let Some(ref health_state) = ctx.health_state {
                    health_state.metrics.record_task(kind);
                }
                ctx.publish_normal_event(
                    cluster,
                    &format!("Successful{action}"),
                    action,
                    Some(format!("{action}d {what} {object}")),
                )
                .await;
            }
            Err(e) => {
                failed += 1;
                let change = if kind.is_add() {
                    ObservedChange::Added
                } else {
                    ObservedChange::Deleted
                };
                ctx.expectations.observe(key, change);
                warn!(cluster = %key, tier = %task.tier(), task = %task, error = %e, "Task failed");
                if let Some(ref health_state) = ctx.health_state {
                    health_state.metrics.record_dispatch_failure(kind);
                }
                ctx.publish_warning_event(
                    cluster,
                    &format!("Failed{action}"),
                    action,
                    Some(format!("Failed to {verb} {what} {object}: {e}")),
                )
                .await;
            }
        }
    }
    failed
}

async fn dispatch_task(namespace: &str, task: &Task, ctx: &Context) -> Result<()> {
    let collaborators = &ctx.collaborators;
    match task {
        Task::CreatePod { template, .. } => collaborators.pods.create_pod(namespace, template).await,
        Task::CreateService { service, .. } => {
            collaborators.services.create_service(namespace, service).await
        }
        Task::DeletePod { name, .. } => collaborators.pods.delete_pod(namespace, name).await,
        Task::DeleteService { name, .. } => {
            collaborators.services.delete_service(namespace, name).await
        }
    }
}

/// Report a spec that cannot be realised. Terminal until the object changes.
async fn report_invalid_spec(
    key: &ClusterKey,
    cluster: &TidbCluster,
    ctx: &Context,
    error: &Error,
) -> Result<SyncOutcome> {
    let message = match error {
        Error::SpecInvalid(message) => message.clone(),
        other => other.to_string(),
    };
    let previous = cluster.status.as_ref();
    let status = failed_status(previous, &message, cluster.metadata.generation);

    if previous != Some(&status) {
        warn!(cluster = %key, error = %message, "Cluster spec is invalid");
        ctx.publish_warning_event(cluster, REASON_SPEC_INVALID, "Validate", Some(message))
            .await;
        ctx.collaborators
            .clusters
            .update_status(key, &status, cluster.resource_version())
            .await?;
    }
    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_phase(&key.namespace, &key.name, status.phase);
    }

    Ok(SyncOutcome {
        state: Some(ClusterState::Failed),
        skipped: None,
        planned: Vec::new(),
        blocked: Vec::new(),
        dispatched: 0,
        repaired: 0,
        action: Action::await_change(),
    })
}

fn forget_cluster(key: &ClusterKey, ctx: &Context) {
    ctx.expectations.forget(key);
    ctx.backoff.reset(key);
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.forget_cluster(&key.namespace, &key.name);
    }
}
