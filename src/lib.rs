//! tidb-operator library crate
//!
//! This module exports the controller, CRD definitions, planner, resource
//! composers and the collaborator clients.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod planner;
pub mod resources;

pub use health::HealthState;

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::events::Reporter;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, controller as runtime_controller, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use client::{KubeClusterStore, KubeEventSink, KubePodControl, KubeServiceControl, ReflectorCache};
use config::OperatorConfig;
use controller::context::{Collaborators, Context, FIELD_MANAGER};
use controller::expectations::ExpectationTracker;
use controller::notifications::{ClusterObserver, SyncFlag, WatchObserver};
use controller::reconciler::{error_policy, reconcile};
use crd::TidbCluster;
use resources::common::managed_label_selector;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watches.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Watcher configuration for pods and services, limited to managed objects.
fn managed_watcher_config() -> WatcherConfig {
    default_watcher_config().labels(&managed_label_selector())
}

/// Create an owned-object stream that feeds the expectation tracker.
///
/// The reflector store is updated before the observer sees an event, so
/// by the time an expectation is lowered the object is in the cache.
fn observed_stream<K>(
    api: Api<K>,
    mut observer: WatchObserver,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>> + Send + 'static,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, managed_watcher_config()))
        .default_backoff()
        .inspect_ok(move |event| observer.observe(event))
        .touched_objects();
    (reader, stream)
}

/// Create the TidbCluster stream; deleted clusters drop their expectations.
fn cluster_stream(
    api: Api<TidbCluster>,
    mut observer: ClusterObserver,
) -> (
    reflector::Store<TidbCluster>,
    impl Stream<Item = Result<TidbCluster, watcher::Error>> + Send + 'static,
) {
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, default_watcher_config()))
        .default_backoff()
        .inspect_ok(move |event| observer.observe(event))
        .applied_objects();
    (reader, stream)
}

/// Run the operator controller until `shutdown` resolves.
///
/// Watches TidbCluster resources and the pods and services they own, in
/// `config.namespace` or cluster-wide. In-flight reconciliations finish
/// after shutdown is triggered; no new ones start.
pub async fn run_controller(
    client: Client,
    config: &OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let namespace = config.namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        workers = config.workers,
        "Starting controller for TidbCluster resources"
    );

    let expectations = Arc::new(ExpectationTracker::new(config.expectation_ttl()));
    let pods_synced = SyncFlag::new();
    let services_synced = SyncFlag::new();

    let (cluster_reader, clusters) = cluster_stream(
        scoped_api(client.clone(), namespace),
        ClusterObserver::new(expectations.clone()),
    );
    let (pod_reader, pods) = observed_stream::<Pod>(
        scoped_api(client.clone(), namespace),
        WatchObserver::new(expectations.clone(), pods_synced.clone()),
    );
    let (service_reader, services) = observed_stream::<Service>(
        scoped_api(client.clone(), namespace),
        WatchObserver::new(expectations.clone(), services_synced.clone()),
    );

    let reporter = Reporter {
        controller: FIELD_MANAGER.into(),
        instance: std::env::var("POD_NAME").ok(),
    };
    let collaborators = Collaborators {
        cache: Arc::new(ReflectorCache::new(
            pod_reader,
            service_reader,
            pods_synced,
            services_synced,
        )),
        clusters: Arc::new(KubeClusterStore::new(client.clone(), cluster_reader.clone())),
        pods: Arc::new(KubePodControl::new(client.clone())),
        services: Arc::new(KubeServiceControl::new(client.clone())),
        events: Arc::new(KubeEventSink::new(client, reporter)),
    };

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(
        collaborators,
        expectations,
        config.reconciler_settings(),
        health_state,
    ));

    Controller::for_stream(clusters, cluster_reader)
        .owns_stream(pods)
        .owns_stream(services)
        .with_config(runtime_controller::Config::default().concurrency(config.workers))
        .graceful_shutdown_on(shutdown)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Owned-object events can still queue a cluster that was just deleted.
                    let is_not_found = match &e {
                        runtime_controller::Error::ObjectNotFound(_) => true,
                        runtime_controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    info!("Controller stopped");
}
