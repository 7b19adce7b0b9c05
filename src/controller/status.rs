//! Status management utilities.
//!
//! Builds the reported `TidbClusterStatus` from the derived state of a pass.

use std::collections::BTreeMap;

use crate::controller::cluster_state::TierProgress;
use crate::crd::{ClusterState, Condition, ConditionStatus, ConditionType, TidbClusterStatus};
use crate::planner::ObservedObjects;
use crate::resources::common::instance_status_key;

/// Reason carried by conditions of a cluster whose spec cannot be realised.
pub const REASON_SPEC_INVALID: &str = "SpecInvalid";
const REASON_SPEC_VALID: &str = "SpecValid";

/// Builder for the conditions list.
///
/// Conditions whose status did not change keep the transition time they
/// had in the previous status.
pub struct ConditionBuilder {
    previous: Vec<Condition>,
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::from_previous(&[])
    }

    /// Start from the conditions currently persisted.
    pub fn from_previous(previous: &[Condition]) -> Self {
        Self {
            previous: previous.to_vec(),
            conditions: Vec::new(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(prior) = self
            .previous
            .iter()
            .find(|c| c.r#type == condition.r#type && c.status == condition.status)
        {
            condition.last_transition_time = prior.last_transition_time.clone();
        }
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    pub fn available(&mut self, available: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::available(available, reason, message))
    }

    pub fn progressing(&mut self, progressing: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::progressing(progressing, reason, message))
    }

    pub fn failed(&mut self, failed: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::failed(failed, reason, message))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    let wanted = condition_type.to_string();
    conditions
        .iter()
        .find(|c| c.r#type == wanted)
        .is_some_and(|c| c.status == ConditionStatus::True)
}

/// Get the reason for a condition
pub fn get_condition_reason(conditions: &[Condition], condition_type: ConditionType) -> Option<&str> {
    let wanted = condition_type.to_string();
    conditions
        .iter()
        .find(|c| c.r#type == wanted)
        .map(|c| c.reason.as_str())
}

/// Per-tier replica summary, e.g. `metadata 3/3, storage 1/2`.
pub fn progress_message(tiers: &[TierProgress]) -> String {
    tiers
        .iter()
        .map(|t| format!("{} {}/{}", t.kind.lowercase(), t.pods_in_range, t.desired))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Status reported after a reconciliation pass of a valid cluster.
pub fn build_status(
    previous: Option<&TidbClusterStatus>,
    state: ClusterState,
    observed: &ObservedObjects,
    tiers: &[TierProgress],
    generation: Option<i64>,
) -> TidbClusterStatus {
    let now = jiff::Timestamp::now().to_string();
    let message = progress_message(tiers);
    let reason = state.to_string();
    let running = state == ClusterState::Running;

    let mut conditions =
        ConditionBuilder::from_previous(previous.map(|s| s.conditions.as_slice()).unwrap_or(&[]));
    conditions
        .available(running, &reason, &message)
        .progressing(!running, &reason, &message)
        .failed(false, REASON_SPEC_VALID, "");

    let instance_status: BTreeMap<String, String> = observed
        .pods
        .iter()
        .map(|p| (instance_status_key(p.tier, p.index), p.status_string()))
        .collect();

    let start_time = previous
        .and_then(|s| s.start_time.clone())
        .unwrap_or_else(|| now.clone());
    let completion_time = previous
        .and_then(|s| s.completion_time.clone())
        .or_else(|| running.then_some(now));

    TidbClusterStatus {
        phase: state.phase(),
        state: Some(state),
        start_time: Some(start_time),
        completion_time,
        conditions: conditions.build(),
        instance_status,
        observed_generation: generation,
    }
}

/// Terminal status of a cluster whose spec failed validation.
pub fn failed_status(
    previous: Option<&TidbClusterStatus>,
    message: &str,
    generation: Option<i64>,
) -> TidbClusterStatus {
    let mut conditions =
        ConditionBuilder::from_previous(previous.map(|s| s.conditions.as_slice()).unwrap_or(&[]));
    conditions
        .available(false, REASON_SPEC_INVALID, message)
        .progressing(false, REASON_SPEC_INVALID, message)
        .failed(true, REASON_SPEC_INVALID, message);

    TidbClusterStatus {
        phase: ClusterState::Failed.phase(),
        state: Some(ClusterState::Failed),
        start_time: previous
            .and_then(|s| s.start_time.clone())
            .or_else(|| Some(jiff::Timestamp::now().to_string())),
        completion_time: previous.and_then(|s| s.completion_time.clone()),
        conditions: conditions.build(),
        instance_status: previous
            .map(|s| s.instance_status.clone())
            .unwrap_or_default(),
        observed_generation: generation,
    }
}
