//! Kubernetes event publishing through the runtime recorder.

use async_trait::async_trait;
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::EventSink;
use crate::crd::TidbCluster;

#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, cluster: &TidbCluster, event: Event) {
        let object_ref = cluster.object_ref(&());
        if let Err(e) = self.recorder.publish(&event, &object_ref).await {
            tracing::warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}
