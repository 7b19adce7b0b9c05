//! Corrective tasks emitted by the planner.

use std::fmt;

use k8s_openapi::api::core::v1::{PodTemplateSpec, Service};

use crate::crd::TierKind;

/// Kind of a corrective task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CreatePod,
    DeletePod,
    CreateService,
    DeleteService,
}

impl TaskKind {
    /// Whether completing the task produces an add notification.
    pub fn is_add(&self) -> bool {
        matches!(self, TaskKind::CreatePod | TaskKind::CreateService)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::CreatePod => write!(f, "CreatePod"),
            TaskKind::DeletePod => write!(f, "DeletePod"),
            TaskKind::CreateService => write!(f, "CreateService"),
            TaskKind::DeleteService => write!(f, "DeleteService"),
        }
    }
}

/// One corrective action for one replica. Consumed once by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    CreatePod {
        tier: TierKind,
        index: u32,
        template: Box<PodTemplateSpec>,
    },
    CreateService {
        tier: TierKind,
        index: u32,
        service: Box<Service>,
    },
    DeletePod {
        tier: TierKind,
        index: u32,
        name: String,
    },
    DeleteService {
        tier: TierKind,
        index: u32,
        name: String,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::CreatePod { .. } => TaskKind::CreatePod,
            Task::CreateService { .. } => TaskKind::CreateService,
            Task::DeletePod { .. } => TaskKind::DeletePod,
            Task::DeleteService { .. } => TaskKind::DeleteService,
        }
    }

    pub fn tier(&self) -> TierKind {
        match self {
            Task::CreatePod { tier, .. }
            | Task::CreateService { tier, .. }
            | Task::DeletePod { tier, .. }
            | Task::DeleteService { tier, .. } => *tier,
        }
    }

    pub fn replica_index(&self) -> u32 {
        match self {
            Task::CreatePod { index, .. }
            | Task::CreateService { index, .. }
            | Task::DeletePod { index, .. }
            | Task::DeleteService { index, .. } => *index,
        }
    }

    /// Name of the object the task acts on.
    pub fn object_name(&self) -> String {
        match self {
            Task::CreatePod { template, .. } => template
                .metadata
                .as_ref()
                .and_then(|m| m.name.clone())
                .unwrap_or_default(),
            Task::CreateService { service, .. } => service.metadata.name.clone().unwrap_or_default(),
            Task::DeletePod { name, .. } | Task::DeleteService { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.object_name())
    }
}
