//! Command dispatcher.
//!
//! Turns an [`ActionRequest`] into `POST /server/{action}/{target}` calls
//! against project control planes and reports whether each call was
//! *accepted*. It does not wait for processes to actually change state;
//! callers schedule a follow-up refresh for that.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use opsdeck_core::{
    Action, ActionRequest, ActionScope, ConfigError, OpsdeckConfig, ProjectId, ProjectTarget,
    SlotId, TargetKind,
};
use opsdeck_health::transport;

use crate::error::DispatchError;

/// Acknowledgement from the control plane(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body returned by the command endpoints.
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// One physical request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    project: ProjectId,
    address: String,
    path: String,
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    targets: Arc<[ProjectTarget]>,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(targets: Vec<ProjectTarget>, timeout: Duration) -> Self {
        Self {
            targets: targets.into(),
            timeout,
        }
    }

    pub fn from_config(config: &OpsdeckConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.resolve()?, config.dispatch.timeout()))
    }

    /// Send `request`. Actions that need confirmation are refused unless
    /// `confirmed` is set.
    pub async fn dispatch(
        &self,
        request: &ActionRequest,
        confirmed: bool,
    ) -> Result<DispatchAck, DispatchError> {
        if request.requires_confirmation() && !confirmed {
            return Err(DispatchError::ConfirmationRequired(request.action));
        }

        let commands = self.plan(request)?;
        info!(action = %request.action, scope = ?request.scope, commands = commands.len(), "dispatching");

        let sends = commands.iter().map(|c| self.send(c));
        let results = join_all(sends).await;

        if let [single] = results.as_slice() {
            return match single {
                Ok(message) => Ok(DispatchAck {
                    accepted: true,
                    message: message.clone(),
                }),
                Err(e) => Err(e.clone()),
            };
        }

        let failed: Vec<String> = results
            .iter()
            .filter_map(|r| r.as_ref().err().map(ToString::to_string))
            .collect();
        let accepted = results.len() - failed.len();
        if failed.is_empty() {
            Ok(DispatchAck {
                accepted: true,
                message: Some(format!("{} accepted by {accepted} projects", request.action)),
            })
        } else {
            Err(DispatchError::Incomplete { accepted, failed })
        }
    }

    /// Whether `project` is sharded and configures `slot`.
    pub fn has_slot(&self, project: &str, slot: SlotId) -> bool {
        self.find(project).is_ok_and(|t| match &t.kind {
            TargetKind::Sharded(layout) => layout.has_slot(slot),
            TargetKind::Simple { .. } => false,
        })
    }

    fn find(&self, project: &str) -> Result<&ProjectTarget, DispatchError> {
        self.targets
            .iter()
            .find(|t| t.id == project)
            .ok_or_else(|| DispatchError::UnknownProject(project.to_string()))
    }

    fn command(&self, target: &ProjectTarget, action: Action, segment: &str) -> Result<Command, DispatchError> {
        let address = target
            .control_address()
            .ok_or_else(|| DispatchError::NoControlPlane(target.id.clone()))?;
        Ok(Command {
            project: target.id.clone(),
            address,
            path: format!("/server/{}/{segment}", action.as_str()),
        })
    }

    fn plan(&self, request: &ActionRequest) -> Result<Vec<Command>, DispatchError> {
        let action = request.action;
        match &request.scope {
            ActionScope::Worker { project, port } => {
                let target = self.find(project)?;
                if !owns_port(target, *port) {
                    return Err(DispatchError::UnknownWorker {
                        project: project.clone(),
                        port: *port,
                    });
                }
                Ok(vec![self.command(target, action, &port.to_string())?])
            }
            ActionScope::Slot { project, slot } => {
                let target = self.find(project)?;
                match &target.kind {
                    TargetKind::Sharded(layout) if layout.has_slot(*slot) => {
                        Ok(vec![self.command(target, action, &slot.to_string())?])
                    }
                    _ => Err(DispatchError::UnknownSlot {
                        project: project.clone(),
                        slot: *slot,
                    }),
                }
            }
            ActionScope::Project { project } => {
                let target = self.find(project)?;
                Ok(vec![self.command(target, action, "all")?])
            }
            ActionScope::All => {
                let commands: Vec<Command> = self
                    .targets
                    .iter()
                    .filter_map(|t| self.command(t, action, "all").ok())
                    .collect();
                if commands.is_empty() {
                    return Err(DispatchError::NoControlPlane("all".to_string()));
                }
                Ok(commands)
            }
        }
    }

    async fn send(&self, command: &Command) -> Result<Option<String>, DispatchError> {
        let reply = transport::send(Method::POST, &command.address, &command.path, None, self.timeout)
            .await
            .map_err(|e| {
                error!(project = %command.project, path = %command.path, error = %e, "control plane unreachable");
                DispatchError::Unreachable {
                    project: command.project.clone(),
                    message: e.to_string(),
                }
            })?;

        let parsed = serde_json::from_slice::<CommandReply>(&reply.body);
        let rejected = |message: String| {
            error!(project = %command.project, path = %command.path, %message, "command rejected");
            DispatchError::Rejected {
                project: command.project.clone(),
                message,
            }
        };

        if !reply.status.is_success() {
            let detail = parsed
                .ok()
                .and_then(|r| r.error.or(r.message))
                .unwrap_or_else(|| format!("HTTP {}", reply.status.as_u16()));
            return Err(rejected(detail));
        }

        match parsed {
            Ok(r) if r.success => {
                info!(project = %command.project, path = %command.path, "command accepted");
                Ok(r.message)
            }
            Ok(r) => Err(rejected(
                r.error
                    .or(r.message)
                    .unwrap_or_else(|| "command rejected".to_string()),
            )),
            Err(e) => {
                warn!(project = %command.project, error = %e, "command acknowledged without a JSON body");
                Ok(None)
            }
        }
    }
}

/// Whether `port` is one of the project's addressable workers.
fn owns_port(target: &ProjectTarget, port: u16) -> bool {
    match &target.kind {
        TargetKind::Simple { port: own } => *own == port,
        TargetKind::Sharded(layout) => layout.slots.iter().any(|slot| {
            (0..layout.roles.len()).any(|role| layout.worker_port(role, slot.id) == port)
        }),
    }
}
