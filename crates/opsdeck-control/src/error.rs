//! Dispatch errors. Every variant is shown to the operator.

use thiserror::Error;

use opsdeck_core::{Action, ProjectId, SlotId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0} needs explicit confirmation")]
    ConfirmationRequired(Action),

    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("project {project} has no slot {slot}")]
    UnknownSlot { project: ProjectId, slot: SlotId },

    #[error("project {project} has no worker on port {port}")]
    UnknownWorker { project: ProjectId, port: u16 },

    #[error("no control plane configured for {0}")]
    NoControlPlane(String),

    #[error("control plane of {project} unreachable: {message}")]
    Unreachable { project: ProjectId, message: String },

    #[error("control plane of {project} rejected the command: {message}")]
    Rejected { project: ProjectId, message: String },

    #[error("accepted by {accepted} projects, failed: {}", failed.join("; "))]
    Incomplete { accepted: usize, failed: Vec<String> },
}
