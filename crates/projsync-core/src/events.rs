//! Push events from the server
//!
//! Events arrive as a type name plus a JSON payload. They are parsed into the
//! tagged [`ProjectEvent`] union up front and rejected if a required field is
//! missing, so nothing downstream has to guess at payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{LogsList, Patch, ProjectSnapshot, StartMode};

/// Wire names of the event types
pub mod names {
    pub const PROJECT_CHANGED: &str = "projectChanged";
    pub const PROJECT_STATUS_CHANGED: &str = "projectStatusChanged";
    pub const PROJECT_CLOSED: &str = "projectClosed";
    pub const PROJECT_DELETION: &str = "projectDeletion";
    pub const PROJECT_RESTART_RESULT: &str = "projectRestartResult";
    pub const PROJECT_SETTINGS_CHANGED: &str = "projectSettingsChanged";
    pub const LOG_UPDATE: &str = "log-update";
    pub const PROJECT_LOGS_LIST_CHANGED: &str = "projectLogsListChanged";
}

/// An event as received from the transport, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// The `projectID` field of the payload, if it is a non-empty string
    pub fn project_id(&self) -> Option<&str> {
        self.payload
            .get("projectID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Why an event was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Event {0} does not name a project")]
    MissingProjectId(String),

    #[error("Malformed {event_type} event: {reason}")]
    Malformed { event_type: String, reason: String },
}

/// Outcome carried by a restart result event
#[derive(Debug, Clone, PartialEq)]
pub enum RestartOutcome {
    /// Restart accepted; the snapshot carries the new start mode and ports
    Succeeded {
        start_mode: Option<StartMode>,
        snapshot: ProjectSnapshot,
    },
    Failed { reason: String },
}

/// A validated push event
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    /// Fields of the project changed (build finished, container recreated, ...)
    Changed {
        project_id: String,
        snapshot: ProjectSnapshot,
    },
    /// App and/or build status changed
    StatusChanged {
        project_id: String,
        snapshot: ProjectSnapshot,
    },
    /// The project was closed (disabled). `error` is set when closing failed.
    Closed {
        project_id: String,
        snapshot: ProjectSnapshot,
        error: Option<String>,
    },
    Deleted { project_id: String },
    /// Dedicated completion event for a restart request
    RestartResult {
        project_id: String,
        outcome: RestartOutcome,
    },
    SettingsChanged {
        project_id: String,
        snapshot: ProjectSnapshot,
    },
    LogUpdate {
        project_id: String,
        log_name: String,
        logs: String,
        reset: bool,
    },
    LogsListChanged {
        project_id: String,
        logs: LogsList,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogUpdatePayload {
    log_name: String,
    #[serde(default)]
    logs: String,
    #[serde(default)]
    reset: bool,
}

impl ProjectEvent {
    /// Validate a raw event
    pub fn parse(raw: &RawEvent) -> Result<Self, ProtocolError> {
        use names::*;

        let event_type = raw.event_type.as_str();
        if !matches!(
            event_type,
            PROJECT_CHANGED
                | PROJECT_STATUS_CHANGED
                | PROJECT_CLOSED
                | PROJECT_DELETION
                | PROJECT_RESTART_RESULT
                | PROJECT_SETTINGS_CHANGED
                | LOG_UPDATE
                | PROJECT_LOGS_LIST_CHANGED
        ) {
            return Err(ProtocolError::UnknownType(raw.event_type.clone()));
        }

        let project_id = raw
            .project_id()
            .ok_or_else(|| ProtocolError::MissingProjectId(raw.event_type.clone()))?
            .to_string();

        let malformed = |e: serde_json::Error| ProtocolError::Malformed {
            event_type: raw.event_type.clone(),
            reason: e.to_string(),
        };

        let event = match event_type {
            PROJECT_CHANGED => ProjectEvent::Changed {
                project_id,
                snapshot: snapshot_of(&raw.payload).map_err(malformed)?,
            },
            PROJECT_STATUS_CHANGED => ProjectEvent::StatusChanged {
                project_id,
                snapshot: snapshot_of(&raw.payload).map_err(malformed)?,
            },
            PROJECT_SETTINGS_CHANGED => ProjectEvent::SettingsChanged {
                project_id,
                snapshot: snapshot_of(&raw.payload).map_err(malformed)?,
            },
            PROJECT_CLOSED => {
                let error = failure_of(&raw.payload);
                let mut snapshot = snapshot_of(&raw.payload).map_err(malformed)?;
                if error.is_none() {
                    snapshot.state = Patch::Set("closed".to_string());
                }
                ProjectEvent::Closed {
                    project_id,
                    snapshot,
                    error,
                }
            }
            PROJECT_DELETION => ProjectEvent::Deleted { project_id },
            PROJECT_RESTART_RESULT => {
                let outcome = match failure_of(&raw.payload) {
                    Some(reason) => RestartOutcome::Failed { reason },
                    None => {
                        let snapshot = snapshot_of(&raw.payload).map_err(malformed)?;
                        RestartOutcome::Succeeded {
                            start_mode: snapshot.start_mode.value().copied(),
                            snapshot,
                        }
                    }
                };
                ProjectEvent::RestartResult {
                    project_id,
                    outcome,
                }
            }
            LOG_UPDATE => {
                let payload: LogUpdatePayload =
                    serde_json::from_value(raw.payload.clone()).map_err(malformed)?;
                ProjectEvent::LogUpdate {
                    project_id,
                    log_name: payload.log_name,
                    logs: payload.logs,
                    reset: payload.reset,
                }
            }
            PROJECT_LOGS_LIST_CHANGED => ProjectEvent::LogsListChanged {
                project_id,
                logs: serde_json::from_value(raw.payload.clone()).map_err(malformed)?,
            },
            _ => unreachable!("event type validated above"),
        };

        Ok(event)
    }

    pub fn project_id(&self) -> &str {
        match self {
            ProjectEvent::Changed { project_id, .. }
            | ProjectEvent::StatusChanged { project_id, .. }
            | ProjectEvent::Closed { project_id, .. }
            | ProjectEvent::Deleted { project_id }
            | ProjectEvent::RestartResult { project_id, .. }
            | ProjectEvent::SettingsChanged { project_id, .. }
            | ProjectEvent::LogUpdate { project_id, .. }
            | ProjectEvent::LogsListChanged { project_id, .. } => project_id,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ProjectEvent::Changed { .. } => names::PROJECT_CHANGED,
            ProjectEvent::StatusChanged { .. } => names::PROJECT_STATUS_CHANGED,
            ProjectEvent::Closed { .. } => names::PROJECT_CLOSED,
            ProjectEvent::Deleted { .. } => names::PROJECT_DELETION,
            ProjectEvent::RestartResult { .. } => names::PROJECT_RESTART_RESULT,
            ProjectEvent::SettingsChanged { .. } => names::PROJECT_SETTINGS_CHANGED,
            ProjectEvent::LogUpdate { .. } => names::LOG_UPDATE,
            ProjectEvent::LogsListChanged { .. } => names::PROJECT_LOGS_LIST_CHANGED,
        }
    }
}

fn snapshot_of(payload: &Value) -> Result<ProjectSnapshot, serde_json::Error> {
    ProjectSnapshot::deserialize(payload)
}

/// `status: "failed"` results carry their reason in `error` or `errorMsg`
fn failure_of(payload: &Value) -> Option<String> {
    let status = payload.get("status").and_then(Value::as_str)?;
    if status != "failed" {
        return None;
    }
    let reason = payload
        .get("errorMsg")
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("no reason given");
    Some(reason.to_string())
}
