//! TidbCluster Custom Resource Definition.
//!
//! Declares a three-tier database deployment: a Metadata (placement driver)
//! tier, a Storage tier and a Frontend (SQL) tier, each with its own replica
//! count and pod template skeleton.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TidbCluster is a custom resource describing a multi-tier database cluster.
///
/// Example:
/// ```yaml
/// apiVersion: tidb.kubetidb.io/v1alpha1
/// kind: TidbCluster
/// metadata:
///   name: demo
/// spec:
///   tiers:
///     - kind: Metadata
///       replicas: 3
///     - kind: Storage
///       replicas: 3
///     - kind: Frontend
///       replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tidb.kubetidb.io",
    version = "v1alpha1",
    kind = "TidbCluster",
    plural = "tidbclusters",
    shortname = "tc",
    status = "TidbClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TidbClusterSpec {
    /// Ordered tier declarations. Exactly one entry per tier kind.
    #[serde(default)]
    pub tiers: Vec<TierSpec>,
}

impl TidbClusterSpec {
    /// Find the declaration for a tier kind.
    pub fn tier(&self, kind: TierKind) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| t.kind == kind)
    }

    /// Desired replica count for a tier, zero when the tier is not declared.
    pub fn desired_replicas(&self, kind: TierKind) -> i32 {
        self.tier(kind).map_or(0, |t| t.replicas)
    }
}

/// Declaration of a single tier.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    /// Which role this tier plays in the cluster.
    pub kind: TierKind,

    /// Desired number of replicas (default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Pod template skeleton. A per-tier default is used when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "pod_template_schema")]
    pub template: Option<PodTemplateSpec>,
}

impl TierSpec {
    /// Create a tier declaration with the default template.
    pub fn new(kind: TierKind, replicas: i32) -> Self {
        Self {
            kind,
            replicas,
            template: None,
        }
    }

    /// The template skeleton to render pods from.
    pub fn effective_template(&self) -> PodTemplateSpec {
        self.template
            .clone()
            .unwrap_or_else(|| self.kind.default_template())
    }
}

fn default_replicas() -> i32 {
    1
}

fn pod_template_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// Role of a tier.
///
/// Each variant carries its own ports, default image and dependency, so
/// adding a tier is checked for exhaustiveness at compile time.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum TierKind {
    /// Placement driver / metadata members.
    Metadata,
    /// Key-value storage nodes.
    Storage,
    /// Stateless SQL frontends.
    Frontend,
}

impl TierKind {
    /// Tiers in the order they are planned.
    pub const ORDERED: [TierKind; 3] = [TierKind::Metadata, TierKind::Storage, TierKind::Frontend];

    /// Lowercase name used in object names and labels.
    pub fn lowercase(&self) -> &'static str {
        match self {
            TierKind::Metadata => "metadata",
            TierKind::Storage => "storage",
            TierKind::Frontend => "frontend",
        }
    }

    /// Parse the lowercase label form.
    pub fn from_lowercase(value: &str) -> Option<Self> {
        match value {
            "metadata" => Some(TierKind::Metadata),
            "storage" => Some(TierKind::Storage),
            "frontend" => Some(TierKind::Frontend),
            _ => None,
        }
    }

    /// Tier whose addresses must be embedded in this tier's pods.
    pub fn dependency(&self) -> Option<TierKind> {
        match self {
            TierKind::Metadata => None,
            TierKind::Storage | TierKind::Frontend => Some(TierKind::Metadata),
        }
    }

    /// Default container image when no template is declared.
    pub fn default_image(&self) -> &'static str {
        match self {
            TierKind::Metadata => "pingcap/pd:latest",
            TierKind::Storage => "pingcap/tikv:latest",
            TierKind::Frontend => "pingcap/tidb:latest",
        }
    }

    /// Default pod template skeleton: one container named after the tier.
    pub fn default_template(&self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: self.lowercase().to_string(),
                    image: Some(self.default_image().to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Metadata => write!(f, "Metadata"),
            TierKind::Storage => write!(f, "Storage"),
            TierKind::Frontend => write!(f, "Frontend"),
        }
    }
}

/// Status of a TidbCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TidbClusterStatus {
    /// Reported lifecycle phase.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Reconciler state the phase was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClusterState>,

    /// When the controller first acted on this cluster (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the cluster first converged to Running (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Observed status per instance, keyed by `{tier}-{index}`.
    #[serde(default)]
    pub instance_status: BTreeMap<String, String>,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Reported phase of a TidbCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// Not yet reconciled.
    #[default]
    None,
    /// Replicas are being created or converged.
    Pending,
    /// Every tier is at its desired replica count.
    Running,
    /// Terminal success. Not produced by steady-state convergence.
    Succeeded,
    /// The declared spec cannot be realised.
    Failed,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterPhase::None => write!(f, "None"),
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::Succeeded => write!(f, "Succeeded"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Reconciler state, derived from observed objects on every pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterState {
    /// No replica of any tier exists yet.
    Pending,
    /// The Metadata tier is not fully up.
    Provisioning,
    /// Metadata is up, Storage and Frontend are catching up.
    Converging,
    /// All tiers are at their desired counts.
    Running,
    /// The spec is malformed.
    Failed,
}

impl ClusterState {
    /// Phase reported for this state.
    pub fn phase(&self) -> ClusterPhase {
        match self {
            ClusterState::Pending | ClusterState::Provisioning | ClusterState::Converging => {
                ClusterPhase::Pending
            }
            ClusterState::Running => ClusterPhase::Running,
            ClusterState::Failed => ClusterPhase::Failed,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Pending => write!(f, "Pending"),
            ClusterState::Provisioning => write!(f, "Provisioning"),
            ClusterState::Converging => write!(f, "Converging"),
            ClusterState::Running => write!(f, "Running"),
            ClusterState::Failed => write!(f, "Failed"),
        }
    }
}

/// Tri-state condition status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition.
    pub status: ConditionStatus,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status,
            last_transition_time: jiff::Timestamp::now().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an "Available" condition.
    pub fn available(available: bool, reason: &str, message: &str) -> Self {
        Self::new(ConditionType::Available, available.into(), reason, message)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(progressing: bool, reason: &str, message: &str) -> Self {
        Self::new(ConditionType::Progressing, progressing.into(), reason, message)
    }

    /// Create a "Failed" condition.
    pub fn failed(failed: bool, reason: &str, message: &str) -> Self {
        Self::new(ConditionType::Failed, failed.into(), reason, message)
    }

    /// True when type, status, reason and message match, ignoring timestamps.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Types of conditions for TidbCluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// Every tier is at its desired replica count.
    Available,
    /// The controller is still creating or removing replicas.
    Progressing,
    /// The declared spec cannot be realised.
    Failed,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionType::Available => write!(f, "Available"),
            ConditionType::Progressing => write!(f, "Progressing"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}
