//! In-memory stand-in for the Kubernetes API and watch cache.
//!
//! Writes land on the "server" immediately and queue a watch notification.
//! The cache only changes when notifications are delivered, which also
//! feeds them through the production `WatchObserver`s, so tests control
//! exactly when the reconciler sees its own writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodStatus, PodTemplateSpec, Service};
use kube::runtime::events::{Event, EventType};
use kube::runtime::watcher;
use kube::ResourceExt;
use parking_lot::Mutex;

use tidb_operator::client::cluster_store::status_replacement;
use tidb_operator::client::{
    ClusterStore, EventSink, ObjectCache, PodControl, ServiceControl, check_owned_metadata,
};
use tidb_operator::controller::context::{Collaborators, Context, ReconcilerSettings};
use tidb_operator::controller::error::{Error, Result};
use tidb_operator::controller::expectations::ExpectationTracker;
use tidb_operator::controller::notifications::{SyncFlag, WatchObserver};
use tidb_operator::controller::reconciler::{SyncOutcome, sync_cluster};
use tidb_operator::crd::{TidbCluster, TidbClusterSpec, TidbClusterStatus};
use tidb_operator::planner::ObservedObjects;
use tidb_operator::resources::common::ClusterKey;
use tidb_operator::resources::pods::pod_from_template;
use tidb_operator::resources::services::selector_patch;

/// A write the reconciler sent, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    CreatePod(String),
    DeletePod(String),
    CreateService(String),
    DeleteService(String),
    PatchService(String),
    UpdateStatus(String),
}

/// An event the reconciler published.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

struct FakeState {
    clusters: BTreeMap<ClusterKey, TidbCluster>,
    server_pods: BTreeMap<String, Pod>,
    server_services: BTreeMap<String, Service>,
    cache_pods: BTreeMap<String, Pod>,
    cache_services: BTreeMap<String, Service>,
    pending_pods: Vec<watcher::Event<Pod>>,
    pending_services: Vec<watcher::Event<Service>>,
    pod_observer: WatchObserver,
    service_observer: WatchObserver,
    failing: HashSet<String>,
    conflict_next_status: bool,
    calls: Vec<ApiCall>,
    events: Vec<RecordedEvent>,
    next_uid: u64,
    next_resource_version: u64,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
    pods_synced: SyncFlag,
    services_synced: SyncFlag,
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl FakeCluster {
    /// A fake whose caches have finished their initial list.
    pub fn new(expectations: Arc<ExpectationTracker>) -> Arc<Self> {
        let fake = Self::unsynced(expectations);
        {
            let mut state = fake.state.lock();
            state.pod_observer.observe(&watcher::Event::<Pod>::Init);
            state.pod_observer.observe(&watcher::Event::<Pod>::InitDone);
            state.service_observer.observe(&watcher::Event::<Service>::Init);
            state
                .service_observer
                .observe(&watcher::Event::<Service>::InitDone);
        }
        fake
    }

    /// A fake whose caches are still listing.
    pub fn unsynced(expectations: Arc<ExpectationTracker>) -> Arc<Self> {
        let pods_synced = SyncFlag::new();
        let services_synced = SyncFlag::new();
        Arc::new(Self {
            state: Mutex::new(FakeState {
                clusters: BTreeMap::new(),
                server_pods: BTreeMap::new(),
                server_services: BTreeMap::new(),
                cache_pods: BTreeMap::new(),
                cache_services: BTreeMap::new(),
                pending_pods: Vec::new(),
                pending_services: Vec::new(),
                pod_observer: WatchObserver::new(expectations.clone(), pods_synced.clone()),
                service_observer: WatchObserver::new(expectations, services_synced.clone()),
                failing: HashSet::new(),
                conflict_next_status: false,
                calls: Vec::new(),
                events: Vec::new(),
                next_uid: 0,
                next_resource_version: 1,
            }),
            pods_synced,
            services_synced,
        })
    }

    /// Collaborators backed by this fake.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            cache: self.clone(),
            clusters: self.clone(),
            pods: self.clone(),
            services: self.clone(),
            events: self.clone(),
        }
    }

    pub fn add_cluster(&self, cluster: TidbCluster) -> ClusterKey {
        let key = ClusterKey::from_resource(&cluster);
        self.state.lock().clusters.insert(key.clone(), cluster);
        key
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<TidbCluster> {
        self.state.lock().clusters.get(key).cloned()
    }

    pub fn status(&self, key: &ClusterKey) -> Option<TidbClusterStatus> {
        self.cluster(key).and_then(|c| c.status)
    }

    /// Change the spec the way an API write would: new generation and resourceVersion.
    pub fn update_spec(&self, key: &ClusterKey, change: impl FnOnce(&mut TidbClusterSpec)) {
        let mut state = self.state.lock();
        let rv = state.bump_resource_version();
        if let Some(cluster) = state.clusters.get_mut(key) {
            change(&mut cluster.spec);
            cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
            cluster.metadata.resource_version = Some(rv);
        }
    }

    pub fn delete_cluster(&self, key: &ClusterKey) {
        self.state.lock().clusters.remove(key);
    }

    /// Deliver queued watch notifications to the cache and the observers.
    pub fn deliver(&self) -> usize {
        let mut state = self.state.lock();
        let pods: Vec<_> = state.pending_pods.drain(..).collect();
        let services: Vec<_> = state.pending_services.drain(..).collect();
        let delivered = pods.len() + services.len();
        for event in pods {
            state.apply_pod(&event);
            state.pod_observer.observe(&event);
        }
        for event in services {
            state.apply_service(&event);
            state.service_observer.observe(&event);
        }
        delivered
    }

    /// Update the cache but drop the notifications before the observers see them.
    pub fn lose_notifications(&self) -> usize {
        let mut state = self.state.lock();
        let pods: Vec<_> = state.pending_pods.drain(..).collect();
        let services: Vec<_> = state.pending_services.drain(..).collect();
        let lost = pods.len() + services.len();
        for event in pods {
            state.apply_pod(&event);
        }
        for event in services {
            state.apply_service(&event);
        }
        lost
    }

    /// Make every write to the named object fail until healed.
    pub fn fail_object(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    pub fn heal_object(&self, name: &str) {
        self.state.lock().failing.remove(name);
    }

    /// Reject the next status write as a lost optimistic-concurrency race.
    pub fn conflict_next_status_write(&self) {
        self.state.lock().conflict_next_status = true;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn status_writes(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ApiCall::UpdateStatus(_)))
            .count()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().events.clone()
    }

    /// Names of pods that exist on the server.
    pub fn pod_names(&self) -> Vec<String> {
        self.state
            .lock()
            .server_pods
            .values()
            .map(|p| p.name_any())
            .collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state
            .lock()
            .server_services
            .values()
            .map(|s| s.name_any())
            .collect()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .server_pods
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .server_services
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Overwrite a service's selector on the server and in the cache.
    pub fn set_service_selector(
        &self,
        namespace: &str,
        name: &str,
        selector: BTreeMap<String, String>,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = object_key(namespace, name);
        for store in [&mut state.server_services, &mut state.cache_services] {
            if let Some(spec) = store.get_mut(&key).and_then(|s| s.spec.as_mut()) {
                spec.selector = Some(selector.clone());
            }
        }
    }

    fn check_failure(&self, name: &str) -> Result<()> {
        if self.state.lock().failing.contains(name) {
            return Err(Error::Transient(format!("injected failure for {name}")));
        }
        Ok(())
    }
}

impl FakeState {
    fn bump_resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }

    fn apply_pod(&mut self, event: &watcher::Event<Pod>) {
        match event {
            watcher::Event::Apply(pod) | watcher::Event::InitApply(pod) => {
                let key = object_key(&pod.namespace().unwrap_or_default(), &pod.name_any());
                self.cache_pods.insert(key, pod.clone());
            }
            watcher::Event::Delete(pod) => {
                let key = object_key(&pod.namespace().unwrap_or_default(), &pod.name_any());
                self.cache_pods.remove(&key);
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }

    fn apply_service(&mut self, event: &watcher::Event<Service>) {
        match event {
            watcher::Event::Apply(svc) | watcher::Event::InitApply(svc) => {
                let key = object_key(&svc.namespace().unwrap_or_default(), &svc.name_any());
                self.cache_services.insert(key, svc.clone());
            }
            watcher::Event::Delete(svc) => {
                let key = object_key(&svc.namespace().unwrap_or_default(), &svc.name_any());
                self.cache_services.remove(&key);
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }
}

impl ObjectCache for FakeCluster {
    fn list_by_owner(&self, key: &ClusterKey) -> ObservedObjects {
        let state = self.state.lock();
        ObservedObjects::collect(key, state.cache_pods.values(), state.cache_services.values())
    }

    fn has_synced(&self) -> bool {
        self.pods_synced.is_set() && self.services_synced.is_set()
    }
}

#[async_trait]
impl ClusterStore for FakeCluster {
    fn get(&self, key: &ClusterKey) -> Option<Arc<TidbCluster>> {
        self.cluster(key).map(Arc::new)
    }

    async fn update_status(
        &self,
        key: &ClusterKey,
        status: &TidbClusterStatus,
        resource_version: Option<String>,
    ) -> Result<()> {
        // Apply exactly what the kube-backed store would PUT
        let body = status_replacement(key, status, resource_version);
        let requested = body["metadata"]
            .get("resourceVersion")
            .and_then(|rv| rv.as_str())
            .map(str::to_string);
        let written: TidbClusterStatus = serde_json::from_value(body["status"].clone())?;

        let mut state = self.state.lock();
        if state.conflict_next_status {
            state.conflict_next_status = false;
            return Err(Error::Conflict("the object has been modified".to_string()));
        }
        let current = state
            .clusters
            .get(key)
            .and_then(|c| c.metadata.resource_version.clone());
        if requested.is_some() && requested != current {
            return Err(Error::Conflict(format!(
                "resourceVersion {requested:?} is stale, current {current:?}"
            )));
        }
        let rv = state.bump_resource_version();
        let Some(cluster) = state.clusters.get_mut(key) else {
            return Err(Error::Transient(format!("cluster {key} not found")));
        };
        cluster.status = Some(written);
        cluster.metadata.resource_version = Some(rv);
        state.calls.push(ApiCall::UpdateStatus(key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl PodControl for FakeCluster {
    async fn create_pod(&self, namespace: &str, template: &PodTemplateSpec) -> Result<()> {
        let mut pod = pod_from_template(template);
        check_owned_metadata(&pod.metadata, "pod")?;
        let name = pod.name_any();
        self.check_failure(&name)?;

        let mut state = self.state.lock();
        state.calls.push(ApiCall::CreatePod(name.clone()));
        let key = object_key(namespace, &name);
        if state.server_pods.contains_key(&key) {
            return Ok(());
        }
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.uid = Some(state.next_uid());
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        state.server_pods.insert(key, pod.clone());
        state.pending_pods.push(watcher::Event::Apply(pod));
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_failure(name)?;
        let mut state = self.state.lock();
        state.calls.push(ApiCall::DeletePod(name.to_string()));
        if let Some(pod) = state.server_pods.remove(&object_key(namespace, name)) {
            state.pending_pods.push(watcher::Event::Delete(pod));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for FakeCluster {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        check_owned_metadata(&service.metadata, "service")?;
        let name = service.name_any();
        self.check_failure(&name)?;

        let mut state = self.state.lock();
        state.calls.push(ApiCall::CreateService(name.clone()));
        let key = object_key(namespace, &name);
        if state.server_services.contains_key(&key) {
            return Ok(());
        }
        let mut service = service.clone();
        service.metadata.namespace = Some(namespace.to_string());
        service.metadata.uid = Some(state.next_uid());
        state.server_services.insert(key, service.clone());
        state.pending_services.push(watcher::Event::Apply(service));
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_failure(name)?;
        let mut state = self.state.lock();
        state.calls.push(ApiCall::DeleteService(name.to_string()));
        if let Some(service) = state.server_services.remove(&object_key(namespace, name)) {
            state.pending_services.push(watcher::Event::Delete(service));
        }
        Ok(())
    }

    async fn patch_service(&self, namespace: &str, name: &str, service: &Service) -> Result<()> {
        self.check_failure(name)?;
        let mut state = self.state.lock();
        state.calls.push(ApiCall::PatchService(name.to_string()));
        let key = object_key(namespace, name);
        let Some(existing) = state.server_services.get(&key) else {
            return Err(Error::Transient(format!("service {name} not found")));
        };
        // Apply the same JSON patch the kube-backed client sends
        let mut doc = serde_json::to_value(existing)?;
        json_patch::patch(&mut doc, &selector_patch(service)?.0)
            .map_err(|e| Error::Transient(format!("patch of service {name} failed: {e}")))?;
        let patched: Service = serde_json::from_value(doc)?;
        state.server_services.insert(key, patched.clone());
        state.pending_services.push(watcher::Event::Apply(patched));
        Ok(())
    }
}

#[async_trait]
impl EventSink for FakeCluster {
    async fn publish(&self, _cluster: &TidbCluster, event: Event) {
        self.state.lock().events.push(RecordedEvent {
            warning: matches!(event.type_, EventType::Warning),
            reason: event.reason,
            note: event.note,
        });
    }
}

/// A fake, its shared expectation tracker and a reconciler context over both.
pub struct Harness {
    pub fake: Arc<FakeCluster>,
    pub expectations: Arc<ExpectationTracker>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconcilerSettings::default())
    }

    pub fn with_settings(settings: ReconcilerSettings) -> Self {
        let expectations = Arc::new(ExpectationTracker::default());
        let fake = FakeCluster::new(expectations.clone());
        let ctx = Arc::new(Context::new(
            fake.collaborators(),
            expectations.clone(),
            settings,
            None,
        ));
        Self {
            fake,
            expectations,
            ctx,
        }
    }

    pub fn unsynced() -> Self {
        let expectations = Arc::new(ExpectationTracker::default());
        let fake = FakeCluster::unsynced(expectations.clone());
        let ctx = Arc::new(Context::new(
            fake.collaborators(),
            expectations.clone(),
            ReconcilerSettings::default(),
            None,
        ));
        Self {
            fake,
            expectations,
            ctx,
        }
    }
}

impl Harness {
    /// Run one reconciliation pass.
    pub async fn pass(&self, key: &ClusterKey) -> Result<SyncOutcome> {
        sync_cluster(key, &self.ctx).await
    }

    /// Pass, deliver notifications, repeat until a pass plans nothing.
    pub async fn converge(&self, key: &ClusterKey, max_passes: usize) -> Result<SyncOutcome> {
        let mut outcome = self.pass(key).await?;
        for _ in 1..max_passes {
            if outcome.skipped.is_none() && outcome.planned.is_empty() {
                break;
            }
            self.fake.deliver();
            outcome = self.pass(key).await?;
        }
        Ok(outcome)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
