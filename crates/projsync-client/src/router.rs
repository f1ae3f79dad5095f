//! Event routing
//!
//! Each connection has one router task draining an inbox. Everything that
//! mutates the project mirror after startup flows through it, so events for
//! the same project are applied strictly in arrival order.

use std::sync::Weak;

use projsync_core::{ProjectEvent, ProjectSnapshot, RawEvent, RestartOutcome, SyncError, SyncResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::connection::{Connection, LogEvent, LogEventKind, RouterInput};
use crate::pending::Confirmation;

/// What happened to a routed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Applied to a known project
    Delivered,
    /// The project was unknown; a resync found it and the event was applied
    DeliveredAfterResync,
    /// Nothing to do (e.g. deletion of a project we never knew)
    Ignored,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Malformed or unattributable payload
    Protocol,
    /// Still unknown after a resync
    UnknownProject,
    /// The owning connection is gone
    ConnectionGone,
    /// The project refused the update
    Refused,
}

/// Routes events to the projects of one connection
pub struct EventRouter {
    connection: Weak<Connection>,
}

impl EventRouter {
    pub fn new(connection: Weak<Connection>) -> Self {
        Self { connection }
    }

    /// Drain the inbox until it closes or the connection is dropped
    pub(crate) fn spawn(self, mut inbox: mpsc::UnboundedReceiver<RouterInput>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(input) = inbox.recv().await {
                if !self.process(input).await {
                    break;
                }
            }
            debug!("Event router stopped");
        })
    }

    /// Returns false once the connection is gone
    async fn process(&self, input: RouterInput) -> bool {
        match input {
            RouterInput::Event { raw, resyncs_seen } => {
                self.route_event(raw, Some(resyncs_seen)).await
                    != Routing::Dropped(DropReason::ConnectionGone)
            }
            RouterInput::Capabilities { project_id, result } => {
                let Some(connection) = self.connection.upgrade() else {
                    return false;
                };
                apply_capabilities(&connection, &project_id, result);
                true
            }
            RouterInput::Resync { resyncs_seen } => {
                let Some(connection) = self.connection.upgrade() else {
                    return false;
                };
                if connection.resync_count() > resyncs_seen {
                    debug!(connection_id = %connection.id(), "Resync already done since requested");
                    return true;
                }
                if let Err(e) = connection.refresh_all().await {
                    warn!(connection_id = %connection.id(), "Queued resync failed: {}", e);
                }
                true
            }
        }
    }

    /// Validate and route one event.
    ///
    /// An event for an unknown project triggers one resync and one retry. It
    /// is dropped if the project is still unknown afterwards.
    pub async fn handle_event(&self, raw: RawEvent) -> Routing {
        self.route_event(raw, None).await
    }

    /// `resyncs_seen` is the resync count when the event was queued. If a
    /// resync has finished since then, an unknown project is looked up in
    /// that listing instead of fetching another one, so a burst of events
    /// for the same missing project costs a single resync.
    async fn route_event(&self, raw: RawEvent, resyncs_seen: Option<u64>) -> Routing {
        let event = match ProjectEvent::parse(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(event_type = %raw.event_type, "Dropping event: {}", e);
                return Routing::Dropped(DropReason::Protocol);
            }
        };

        let Some(connection) = self.connection.upgrade() else {
            return Routing::Dropped(DropReason::ConnectionGone);
        };

        let project_id = event.project_id().to_string();
        let mut resynced = false;

        if !connection.has_project(&project_id) {
            if matches!(event, ProjectEvent::Deleted { .. }) {
                debug!(project_id = %project_id, "Deletion of unknown project");
                return Routing::Ignored;
            }

            let covered = resyncs_seen.is_some_and(|seen| connection.resync_count() > seen);
            if covered {
                debug!(project_id = %project_id, event = event.kind(), "Project unknown after a later resync");
            } else {
                debug!(project_id = %project_id, event = event.kind(), "Event for unknown project, resyncing");
                if let Err(e) = connection.refresh_all().await {
                    warn!(project_id = %project_id, "Resync failed: {}", e);
                }
            }
            if !connection.has_project(&project_id) {
                warn!(
                    project_id = %project_id,
                    event = event.kind(),
                    "Project still unknown after resync, dropping event"
                );
                return Routing::Dropped(DropReason::UnknownProject);
            }
            resynced = true;
        }

        let kind = event.kind();
        match dispatch(&connection, event) {
            Ok(()) if resynced => Routing::DeliveredAfterResync,
            Ok(()) => Routing::Delivered,
            Err(SyncError::ProjectNotFound(_)) => Routing::Ignored,
            Err(e) => {
                error!(project_id = %project_id, event = kind, "Update refused: {}", e);
                Routing::Dropped(DropReason::Refused)
            }
        }
    }
}

fn dispatch(connection: &Connection, event: ProjectEvent) -> SyncResult<()> {
    match event {
        ProjectEvent::Changed {
            project_id,
            snapshot,
        }
        | ProjectEvent::StatusChanged {
            project_id,
            snapshot,
        }
        | ProjectEvent::SettingsChanged {
            project_id,
            snapshot,
        } => {
            connection.apply_update(&project_id, &snapshot)?;
        }

        ProjectEvent::Closed {
            project_id,
            snapshot,
            error,
        } => {
            connection.apply_update(&project_id, &snapshot)?;
            let result = match error {
                Some(reason) => Err(reason),
                None => Ok(()),
            };
            connection.confirm(&project_id, Confirmation::Closed(result));
        }

        ProjectEvent::Deleted { project_id } => {
            connection.delete_project(&project_id);
        }

        ProjectEvent::RestartResult {
            project_id,
            outcome,
        } => match outcome {
            RestartOutcome::Succeeded { snapshot, .. } => {
                connection.apply_update(&project_id, &snapshot)?;
                connection.confirm(&project_id, Confirmation::Restart(Ok(())));
            }
            RestartOutcome::Failed { reason } => {
                connection.confirm(&project_id, Confirmation::Restart(Err(reason)));
            }
        },

        ProjectEvent::LogUpdate {
            project_id,
            log_name,
            logs,
            reset,
        } => connection.publish_log(LogEvent {
            project_id,
            kind: LogEventKind::Update {
                log_name,
                logs,
                reset,
            },
        }),

        ProjectEvent::LogsListChanged { project_id, logs } => {
            connection.publish_log(LogEvent {
                project_id,
                kind: LogEventKind::ListChanged(logs),
            })
        }
    }
    Ok(())
}

fn apply_capabilities(
    connection: &Connection,
    project_id: &str,
    result: SyncResult<projsync_core::ProjectCapabilities>,
) {
    match result {
        Ok(capabilities) => {
            // Disabled again before the answer arrived
            if !connection
                .get_project(project_id)
                .is_some_and(|p| p.is_enabled())
            {
                debug!(project_id, "Discarding capabilities for disabled project");
                return;
            }
            let snapshot = ProjectSnapshot::new(project_id).with_capabilities(capabilities);
            if let Err(e) = connection.apply_update(project_id, &snapshot) {
                debug!(project_id, "Capabilities not applied: {}", e);
            }
        }
        Err(e) => warn!(project_id, "Failed to fetch capabilities: {}", e),
    }
}
