//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::info;

use crate::crd::{ClusterPhase, TierKind};
use crate::planner::TaskKind;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-task-kind metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TaskLabels {
    pub kind: String,
}

impl EncodeLabelSet for TaskLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-tier replica metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TierLabels {
    pub namespace: String,
    pub name: String,
    pub tier: String,
}

impl EncodeLabelSet for TierLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("tier", self.tier.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Total clusters by phase
    pub clusters_total: Family<PhaseLabels, Gauge>,
    /// Desired replicas per tier
    pub tier_replicas_desired: Family<TierLabels, Gauge>,
    /// Observed replicas per tier
    pub tier_replicas_observed: Family<TierLabels, Gauge>,
    /// Tasks dispatched successfully, by kind
    pub tasks_dispatched_total: Family<TaskLabels, Counter>,
    /// Tasks that failed to dispatch, by kind
    pub dispatch_failures_total: Family<TaskLabels, Counter>,
    /// Passes skipped on unsatisfied expectations
    pub expectation_skips_total: Family<ReconcileLabels, Counter>,
    /// Last reported phase per cluster, source of `clusters_total`
    phases: Mutex<HashMap<(String, String), ClusterPhase>>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "tidb_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "tidb_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "tidb_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let clusters_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "tidb_operator_clusters",
            "Number of TidbCluster resources by phase",
            clusters_total.clone(),
        );

        let tier_replicas_desired = Family::<TierLabels, Gauge>::default();
        registry.register(
            "tidb_operator_tier_replicas_desired",
            "Desired number of replicas for each tier",
            tier_replicas_desired.clone(),
        );

        let tier_replicas_observed = Family::<TierLabels, Gauge>::default();
        registry.register(
            "tidb_operator_tier_replicas_observed",
            "Observed number of replicas for each tier",
            tier_replicas_observed.clone(),
        );

        let tasks_dispatched_total = Family::<TaskLabels, Counter>::default();
        registry.register(
            "tidb_operator_tasks_dispatched",
            "Total number of tasks dispatched",
            tasks_dispatched_total.clone(),
        );

        let dispatch_failures_total = Family::<TaskLabels, Counter>::default();
        registry.register(
            "tidb_operator_dispatch_failures",
            "Total number of tasks that failed to dispatch",
            dispatch_failures_total.clone(),
        );

        let expectation_skips_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "tidb_operator_expectation_skips",
            "Reconciliations skipped while expectations were pending",
            expectation_skips_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters_total,
            tier_replicas_desired,
            tier_replicas_observed,
            tasks_dispatched_total,
            dispatch_failures_total,
            expectation_skips_total,
            phases: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record the phase a cluster was last reported in and refresh the per-phase gauge
    pub fn record_phase(&self, namespace: &str, name: &str, phase: ClusterPhase) {
        let mut phases = self.phases.lock();
        phases.insert((namespace.to_string(), name.to_string()), phase);
        self.refresh_phases(&phases);
    }

    /// Drop a deleted cluster from the per-phase gauge
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        let mut phases = self.phases.lock();
        if phases
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some()
        {
            self.refresh_phases(&phases);
        }
    }

    fn refresh_phases(&self, phases: &HashMap<(String, String), ClusterPhase>) {
        for phase in [
            ClusterPhase::None,
            ClusterPhase::Pending,
            ClusterPhase::Running,
            ClusterPhase::Succeeded,
            ClusterPhase::Failed,
        ] {
            let count = phases.values().filter(|p| **p == phase).count();
            self.clusters_total
                .get_or_create(&PhaseLabels {
                    phase: phase.to_string(),
                })
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    /// Update tier replica metrics
    pub fn set_tier_replicas(&self, namespace: &str, name: &str, tier: TierKind, desired: i64, observed: i64) {
        let labels = TierLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            tier: tier.lowercase().to_string(),
        };
        self.tier_replicas_desired.get_or_create(&labels).set(desired);
        self.tier_replicas_observed.get_or_create(&labels).set(observed);
    }

    /// Record a successfully dispatched task
    pub fn record_task(&self, kind: TaskKind) {
        self.tasks_dispatched_total
            .get_or_create(&TaskLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record a task that failed to dispatch
    pub fn record_dispatch_failure(&self, kind: TaskKind) {
        self.dispatch_failures_total
            .get_or_create(&TaskLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record a pass skipped by the expectation gate
    pub fn record_expectation_skip(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.expectation_skips_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (caches synced and controller running)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0 on `port` and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
