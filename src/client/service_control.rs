//! Service client backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};

use crate::client::{ServiceControl, check_owned_metadata};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::resources::services::selector_patch;

#[derive(Clone)]
pub struct KubeServiceControl {
    client: Client,
}

impl KubeServiceControl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceControl for KubeServiceControl {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        check_owned_metadata(&service.metadata, "service")?;

        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.create(&params, service).await.map_err(Error::from) {
            Ok(created) => {
                info!(
                    namespace = %namespace,
                    service = %created.metadata.name.unwrap_or_default(),
                    "Created service"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, service = ?service.metadata.name, "Service already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(Error::from)
        {
            Ok(_) => {
                info!(namespace = %namespace, service = %name, "Deleted service");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, service = %name, "Service already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn patch_service(&self, namespace: &str, name: &str, service: &Service) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let patch = selector_patch(service)?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(name, &params, &Patch::Json::<()>(patch)).await?;
        info!(namespace = %namespace, service = %name, "Patched service selector");
        Ok(())
    }
}
