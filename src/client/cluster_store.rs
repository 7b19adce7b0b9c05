//! TidbCluster reads from the controller's reflector and status writes to the API.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::PostParams;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, Resource};
use tracing::debug;

use crate::client::ClusterStore;
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{TidbCluster, TidbClusterStatus};
use crate::resources::common::ClusterKey;

#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
    reader: Store<TidbCluster>,
}

/// Body of a status subresource PUT.
///
/// The whole status is replaced, so instances and optional fields that are
/// absent from `status` are removed on the server. Everything outside
/// `status` is taken from the stored object; a `resourceVersion` turns the
/// write into a compare-and-swap that fails with 409 when it is stale.
pub fn status_replacement(
    key: &ClusterKey,
    status: &TidbClusterStatus,
    resource_version: Option<String>,
) -> serde_json::Value {
    let mut metadata = serde_json::json!({
        "name": key.name,
        "namespace": key.namespace,
    });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv);
    }
    serde_json::json!({
        "apiVersion": TidbCluster::api_version(&()),
        "kind": TidbCluster::kind(&()),
        "metadata": metadata,
        "status": status,
    })
}

impl KubeClusterStore {
    pub fn new(client: Client, reader: Store<TidbCluster>) -> Self {
        Self { client, reader }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    fn get(&self, key: &ClusterKey) -> Option<Arc<TidbCluster>> {
        self.reader
            .get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    async fn update_status(
        &self,
        key: &ClusterKey,
        status: &TidbClusterStatus,
        resource_version: Option<String>,
    ) -> Result<()> {
        let api: Api<TidbCluster> = Api::namespaced(self.client.clone(), &key.namespace);
        let body = serde_json::to_vec(&status_replacement(key, status, resource_version))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.replace_status(&key.name, &params, body).await {
            Ok(_) => {
                debug!(cluster = %key, phase = %status.phase, "Updated status");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::Conflict(e.message.clone())),
            Err(e) => Err(e.into()),
        }
    }
}
