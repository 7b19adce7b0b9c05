//! Per-replica Service generation.
//!
//! Every replica gets its own headless Service named
//! `{cluster}-{tier}-{index}` so that Metadata and Storage members are
//! individually addressable. `publishNotReadyAddresses` is set so peers
//! resolve each other while the founding members are still bootstrapping.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::TierKind;
use crate::resources::common::{
    ClusterIdentity, identity_labels, instance_name, selector_labels,
};

/// Metadata client port
pub const METADATA_CLIENT_PORT: i32 = 2379;
/// Metadata peer port
pub const METADATA_PEER_PORT: i32 = 2380;
/// Storage service port
pub const STORAGE_PORT: i32 = 20160;
/// Storage status port
pub const STORAGE_STATUS_PORT: i32 = 20180;
/// Frontend MySQL protocol port
pub const FRONTEND_PORT: i32 = 4000;
/// Frontend status port
pub const FRONTEND_STATUS_PORT: i32 = 10080;

/// Named ports exposed by a tier.
pub fn tier_ports(tier: TierKind) -> &'static [(&'static str, i32)] {
    match tier {
        TierKind::Metadata => &[("client", METADATA_CLIENT_PORT), ("peer", METADATA_PEER_PORT)],
        TierKind::Storage => &[("server", STORAGE_PORT), ("status", STORAGE_STATUS_PORT)],
        TierKind::Frontend => &[("mysql", FRONTEND_PORT), ("status", FRONTEND_STATUS_PORT)],
    }
}

/// Generate the Service for one replica of a tier.
pub fn compose_service(identity: &ClusterIdentity, tier: TierKind, replica_index: u32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(instance_name(&identity.name, tier, replica_index)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(identity_labels(&identity.name, tier, replica_index)),
            owner_references: Some(vec![identity.owner_reference()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(&identity.name, tier, replica_index)),
            ports: Some(
                tier_ports(tier)
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: Some((*name).to_string()),
                        port: *port,
                        target_port: Some(IntOrString::Int(*port)),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// JSON patch that sets a Service's selector to the composed one.
///
/// An `add` on `/spec/selector` replaces the whole map, so keys that are
/// not in the composed selector are removed. A merge patch would keep them.
pub fn selector_patch(composed: &Service) -> Result<json_patch::Patch, serde_json::Error> {
    serde_json::from_value(serde_json::json!([
        {
            "op": "add",
            "path": "/spec/selector",
            "value": service_selector(composed).cloned().unwrap_or_default(),
        }
    ]))
}

/// Selector of an existing Service, if it has one.
pub fn service_selector(service: &Service) -> Option<&BTreeMap<String, String>> {
    service.spec.as_ref().and_then(|s| s.selector.as_ref())
}
