//! Pod client backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};

use crate::client::{PodControl, check_owned_metadata};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::resources::pods::pod_from_template;

#[derive(Clone)]
pub struct KubePodControl {
    client: Client,
}

impl KubePodControl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodControl for KubePodControl {
    async fn create_pod(&self, namespace: &str, template: &PodTemplateSpec) -> Result<()> {
        let pod = pod_from_template(template);
        check_owned_metadata(&pod.metadata, "pod")?;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.create(&params, &pod).await.map_err(Error::from) {
            Ok(created) => {
                info!(
                    namespace = %namespace,
                    pod = %created.metadata.name.unwrap_or_default(),
                    "Created pod"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, pod = ?pod.metadata.name, "Pod already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(Error::from)
        {
            Ok(_) => {
                info!(namespace = %namespace, pod = %name, "Deleted pod");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, pod = %name, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
