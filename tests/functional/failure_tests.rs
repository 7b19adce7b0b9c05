//! Failure scenarios: partial dispatch, status conflicts, invalid specs,
//! deleted clusters, unsynced caches and drifted services.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::runtime::controller::Action;
use tidb_operator::controller::error::Error;
use tidb_operator::controller::reconciler::{SkipReason, error_policy, reconcile};
use tidb_operator::crd::{ClusterPhase, ClusterState, ConditionType, TierKind};
use tidb_operator::controller::status::{REASON_SPEC_INVALID, get_condition_reason, is_condition_true};
use tidb_operator::planner::TaskKind;

use crate::common::{ApiCall, Harness, TidbClusterBuilder, metadata_only_cluster, three_tier_cluster};

// ============================================================================
// Dispatch failures
// ============================================================================

/// One failing replica does not stop its siblings, and only it is retried.
#[tokio::test]
async fn test_dispatch_failure_is_isolated() {
    let h = Harness::new();
    let key = h.fake.add_cluster(three_tier_cluster("demo"));
    h.pass(&key).await.unwrap();
    h.fake.deliver();

    // The pod and the service of one replica share its name
    h.fake.fail_object("demo-storage-1");
    let err = h.pass(&key).await.unwrap_err();
    assert!(matches!(err, Error::Dispatch { failed: 2, total: 6 }));
    assert!(err.is_retryable());

    let pods = h.fake.pod_names();
    assert!(pods.contains(&"demo-storage-0".to_string()));
    assert!(pods.contains(&"demo-frontend-0".to_string()));
    assert!(!pods.contains(&"demo-storage-1".to_string()));

    // Failed tasks were taken back out of the expectation
    assert_eq!(h.expectations.pending(&key), Some((4, 0)));
    let failures: Vec<_> = h.fake.events().into_iter().filter(|e| e.warning).collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|e| e.reason == "FailedCreate"
        && e.note.as_deref().is_some_and(|n| n.contains("pod demo-storage-1"))));

    h.fake.deliver();
    h.fake.heal_object("demo-storage-1");
    h.fake.clear_calls();
    let outcome = h.pass(&key).await.unwrap();
    assert_eq!(outcome.planned.len(), 2);
    assert!(outcome.planned.iter().all(|t| t.tier == TierKind::Storage && t.index == 1));
    assert_eq!(
        h.fake
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, ApiCall::UpdateStatus(_)))
            .collect::<Vec<_>>(),
        vec![
            ApiCall::CreateService("demo-storage-1".to_string()),
            ApiCall::CreatePod("demo-storage-1".to_string()),
        ]
    );
}

/// Status is still reported when some tasks failed.
#[tokio::test]
async fn test_status_written_despite_dispatch_failure() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 2));
    h.fake.fail_object("demo-metadata-0");

    assert!(h.pass(&key).await.is_err());
    let status = h.fake.status(&key).unwrap();
    assert_eq!(status.state, Some(ClusterState::Pending));
    assert!(h.fake.pod_names().contains(&"demo-metadata-1".to_string()));
}

/// Successful creates are announced with a normal event each.
#[tokio::test]
async fn test_success_events() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 1));
    h.pass(&key).await.unwrap();

    let events = h.fake.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| !e.warning && e.reason == "SuccessfulCreate"));
    assert_eq!(events[0].note.as_deref(), Some("Created service demo-metadata-0"));
    assert_eq!(events[1].note.as_deref(), Some("Created pod demo-metadata-0"));
}

// ============================================================================
// Status conflicts
// ============================================================================

/// A lost status race surfaces as a retryable conflict with per-key backoff.
#[tokio::test]
async fn test_status_conflict_backs_off() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 1));
    let cluster = std::sync::Arc::new(h.fake.cluster(&key).unwrap());

    h.fake.conflict_next_status_write();
    let err = reconcile(cluster.clone(), h.ctx.clone()).await.unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(
        error_policy(cluster.clone(), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(1))
    );
    assert_eq!(
        error_policy(cluster.clone(), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(2))
    );
    assert_eq!(h.ctx.backoff.failures(&key), 2);

    // A successful pass clears the backoff
    h.fake.deliver();
    reconcile(cluster, h.ctx.clone()).await.unwrap();
    assert_eq!(h.ctx.backoff.failures(&key), 0);
    assert_eq!(h.fake.status(&key).unwrap().phase, ClusterPhase::Running);
}

/// A status write based on a stale resourceVersion is rejected.
#[tokio::test]
async fn test_stale_resource_version_conflicts() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 1));
    let stale = std::sync::Arc::new(h.fake.cluster(&key).unwrap());

    h.fake.update_spec(&key, |spec| spec.tiers[0].replicas = 1);
    // The pass reads the fresh object, so it wins
    h.pass(&key).await.unwrap();

    let status = h.fake.status(&key).unwrap();
    let result = h
        .ctx
        .collaborators
        .clusters
        .update_status(&key, &status, stale.metadata.resource_version.clone())
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

// ============================================================================
// Invalid specs
// ============================================================================

/// An invalid spec is reported once and creates nothing.
#[tokio::test]
async fn test_invalid_spec_is_terminal() {
    let h = Harness::new();
    let cluster = TidbClusterBuilder::new("demo")
        .namespace("db")
        .uid("demo-uid")
        .resource_version("1")
        .tier(TierKind::Storage, 2)
        .build();
    let key = h.fake.add_cluster(cluster);

    let outcome = h.pass(&key).await.unwrap();
    assert_eq!(outcome.state, Some(ClusterState::Failed));
    assert_eq!(outcome.action, Action::await_change());
    assert!(h.fake.pod_names().is_empty());

    let status = h.fake.status(&key).unwrap();
    assert_eq!(status.phase, ClusterPhase::Failed);
    assert!(is_condition_true(&status.conditions, ConditionType::Failed));
    assert_eq!(
        get_condition_reason(&status.conditions, ConditionType::Failed),
        Some(REASON_SPEC_INVALID)
    );

    let events = h.fake.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].warning);
    assert_eq!(events[0].reason, REASON_SPEC_INVALID);
    assert!(events[0].note.as_deref().unwrap().contains("requires a Metadata tier"));

    // Nothing changed, so the second pass writes nothing
    h.pass(&key).await.unwrap();
    assert_eq!(h.fake.status_writes(), 1);
    assert_eq!(h.fake.events().len(), 1);
}

/// Fixing the spec resumes convergence.
#[tokio::test]
async fn test_fixed_spec_recovers() {
    let h = Harness::new();
    let cluster = TidbClusterBuilder::new("demo")
        .namespace("db")
        .uid("demo-uid")
        .resource_version("1")
        .tier(TierKind::Metadata, 1)
        .tier(TierKind::Metadata, 2)
        .build();
    let key = h.fake.add_cluster(cluster);
    assert_eq!(
        h.pass(&key).await.unwrap().state,
        Some(ClusterState::Failed)
    );

    h.fake.update_spec(&key, |spec| {
        spec.tiers.pop();
    });
    let outcome = h.converge(&key, 5).await.unwrap();
    assert_eq!(outcome.state, Some(ClusterState::Running));

    let status = h.fake.status(&key).unwrap();
    assert!(!is_condition_true(&status.conditions, ConditionType::Failed));
    assert!(is_condition_true(&status.conditions, ConditionType::Available));
}

// ============================================================================
// Gone clusters and unsynced caches
// ============================================================================

/// A deleted cluster drops its expectations and is not requeued.
#[tokio::test]
async fn test_deleted_cluster_is_forgotten() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 3));
    h.pass(&key).await.unwrap();
    assert!(h.expectations.pending(&key).is_some());

    h.fake.delete_cluster(&key);
    let outcome = h.pass(&key).await.unwrap();
    assert_eq!(outcome.skipped, Some(SkipReason::ClusterGone));
    assert_eq!(outcome.action, Action::await_change());
    assert_eq!(h.expectations.pending(&key), None);
}

/// Nothing is planned before the caches finish their initial list.
#[tokio::test]
async fn test_unsynced_cache_requeues() {
    let h = Harness::unsynced();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 3));

    let outcome = h.pass(&key).await.unwrap();
    assert_eq!(outcome.skipped, Some(SkipReason::CacheNotSynced));
    assert_eq!(outcome.action, Action::requeue(Duration::from_secs(1)));
    assert!(h.fake.calls().is_empty());
}

// ============================================================================
// Service drift
// ============================================================================

/// A service whose selector was edited is patched back.
#[tokio::test]
async fn test_drifted_service_selector_is_repaired() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 2));
    h.converge(&key, 5).await.unwrap();

    let mut wrong = BTreeMap::new();
    wrong.insert("app".to_string(), "something-else".to_string());
    h.fake.set_service_selector("db", "demo-metadata-1", wrong);

    h.fake.clear_calls();
    let outcome = h.pass(&key).await.unwrap();
    assert_eq!(outcome.repaired, 1);
    assert_eq!(outcome.planned_count(TierKind::Metadata, TaskKind::CreateService), 0);
    assert_eq!(
        h.fake.calls(),
        vec![ApiCall::PatchService("demo-metadata-1".to_string())]
    );
    assert!(h
        .fake
        .events()
        .iter()
        .any(|e| e.reason == "SuccessfulUpdate"));

    // The foreign key is gone, not merged alongside the composed ones
    let selector = h
        .fake
        .service("db", "demo-metadata-1")
        .and_then(|svc| svc.spec)
        .and_then(|spec| spec.selector)
        .unwrap();
    assert!(!selector.contains_key("app"));
    assert_eq!(selector.len(), 3);

    h.fake.deliver();
    h.fake.clear_calls();
    assert_eq!(h.pass(&key).await.unwrap().repaired, 0);
    assert!(h.fake.calls().is_empty());
}

/// A failed repair fails the pass.
#[tokio::test]
async fn test_failed_repair_counts_as_dispatch_failure() {
    let h = Harness::new();
    let key = h.fake.add_cluster(metadata_only_cluster("demo", 1));
    h.converge(&key, 5).await.unwrap();

    h.fake
        .set_service_selector("db", "demo-metadata-0", BTreeMap::new());
    h.fake.fail_object("demo-metadata-0");
    let err = h.pass(&key).await.unwrap_err();
    assert!(matches!(err, Error::Dispatch { failed: 1, total: 1 }));
    assert!(h.fake.events().iter().any(|e| e.warning && e.reason == "FailedUpdate"));
}
