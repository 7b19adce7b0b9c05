//! Pod template composition.
//!
//! Renders a tier's template skeleton into the template of one replica:
//! identity labels, owner reference, a stable name and the tier's startup
//! arguments. Rendering is deterministic so a failed create can be retried
//! with a byte-identical template.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use thiserror::Error;

use crate::crd::{TierKind, TierSpec};
use crate::resources::common::{ClusterIdentity, identity_labels, instance_name, service_host};
use crate::resources::services::{
    FRONTEND_PORT, FRONTEND_STATUS_PORT, METADATA_CLIENT_PORT, METADATA_PEER_PORT, STORAGE_PORT,
    STORAGE_STATUS_PORT,
};

/// Reasons a replica template cannot be rendered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// The tier embeds addresses of another tier and none are known yet.
    #[error("{tier} tier needs {dependency} addresses and none are available")]
    DependencyNotReady { tier: TierKind, dependency: TierKind },

    /// The template skeleton has no container to pass arguments to.
    #[error("{0} pod template has no containers")]
    MissingContainer(TierKind),
}

/// Render the pod template for one replica of a tier.
pub fn compose_pod(
    identity: &ClusterIdentity,
    tier: &TierSpec,
    replica_index: u32,
    dependency_addresses: &[String],
) -> Result<PodTemplateSpec, ComposeError> {
    let args = tier_args(identity, tier, replica_index, dependency_addresses)?;

    let mut template = tier.effective_template();
    let container = template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
        .ok_or(ComposeError::MissingContainer(tier.kind))?;
    container.args.get_or_insert_with(Vec::new).extend(args);

    let metadata = template.metadata.get_or_insert_with(Default::default);
    metadata.name = Some(instance_name(&identity.name, tier.kind, replica_index));
    metadata.namespace = Some(identity.namespace.clone());
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(identity_labels(&identity.name, tier.kind, replica_index));
    metadata.owner_references = Some(vec![identity.owner_reference()]);

    Ok(template)
}

/// Build the Pod object a rendered template describes.
pub fn pod_from_template(template: &PodTemplateSpec) -> Pod {
    Pod {
        metadata: template.metadata.clone().unwrap_or_default(),
        spec: template.spec.clone(),
        status: None,
    }
}

/// Address other tiers use to reach a Metadata replica's client endpoint.
pub fn metadata_client_address(host: &str) -> String {
    format!("{host}:{METADATA_CLIENT_PORT}")
}

fn tier_args(
    identity: &ClusterIdentity,
    tier: &TierSpec,
    index: u32,
    dependency_addresses: &[String],
) -> Result<Vec<String>, ComposeError> {
    if let Some(dependency) = tier.kind.dependency()
        && dependency_addresses.is_empty()
    {
        return Err(ComposeError::DependencyNotReady {
            tier: tier.kind,
            dependency,
        });
    }

    let host = service_host(identity, tier.kind, index);
    let args = match tier.kind {
        TierKind::Metadata => {
            let members = u32::try_from(tier.replicas).unwrap_or(0);
            vec![
                format!("--name={}", instance_name(&identity.name, tier.kind, index)),
                "--data-dir=/var/lib/pd".to_string(),
                format!("--client-urls=http://0.0.0.0:{METADATA_CLIENT_PORT}"),
                format!("--advertise-client-urls=http://{host}:{METADATA_CLIENT_PORT}"),
                format!("--peer-urls=http://0.0.0.0:{METADATA_PEER_PORT}"),
                format!("--advertise-peer-urls=http://{host}:{METADATA_PEER_PORT}"),
                format!("--initial-cluster={}", initial_cluster(identity, members)),
            ]
        }
        TierKind::Storage => vec![
            format!("--addr=0.0.0.0:{STORAGE_PORT}"),
            format!("--advertise-addr={host}:{STORAGE_PORT}"),
            format!("--status-addr=0.0.0.0:{STORAGE_STATUS_PORT}"),
            "--data-dir=/var/lib/tikv".to_string(),
            format!("--pd={}", dependency_addresses.join(",")),
        ],
        TierKind::Frontend => vec![
            "--store=tikv".to_string(),
            format!("--path={}", dependency_addresses.join(",")),
            format!("--advertise-address={host}"),
            format!("-P={FRONTEND_PORT}"),
            format!("--status={FRONTEND_STATUS_PORT}"),
        ],
    };
    Ok(args)
}

/// Founding member list of the Metadata tier: `name=peer-url` for every
/// index below the desired count, whether or not that replica exists yet.
fn initial_cluster(identity: &ClusterIdentity, members: u32) -> String {
    (0..members)
        .map(|i| {
            format!(
                "{}=http://{}:{}",
                instance_name(&identity.name, TierKind::Metadata, i),
                service_host(identity, TierKind::Metadata, i),
                METADATA_PEER_PORT
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}
