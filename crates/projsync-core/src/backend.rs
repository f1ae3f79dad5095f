//! ControlBackend trait - outbound commands to the control plane
//!
//! Every command here is fire-and-forget from the state machine's point of
//! view: a successful return only means the backend accepted the request.
//! Completion is confirmed later by a push event.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{ProjectCapabilities, ProjectSnapshot, StartMode};

/// A control command against a single project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Restart(StartMode),
    Remove,
    Enable,
    Disable,
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::Restart(mode) => write!(f, "restart ({})", mode),
            ControlCommand::Remove => f.write_str("remove"),
            ControlCommand::Enable => f.write_str("enable"),
            ControlCommand::Disable => f.write_str("disable"),
        }
    }
}

/// The request side of the control plane for one connection
#[async_trait]
pub trait ControlBackend: Send + Sync {
    /// Request a restart into the given start mode
    async fn restart(&self, project_id: &str, mode: StartMode) -> SyncResult<()>;

    /// Request removal of the project
    async fn remove(&self, project_id: &str) -> SyncResult<()>;

    /// Request the project be opened (enabled) or closed (disabled)
    async fn set_enabled(&self, project_id: &str, enabled: bool) -> SyncResult<()>;

    /// Full listing of every project on the connection
    async fn list_projects(&self) -> SyncResult<Vec<ProjectSnapshot>>;

    /// Capabilities of one project
    async fn get_capabilities(&self, project_id: &str) -> SyncResult<ProjectCapabilities>;

    /// Dispatch a [`ControlCommand`] to the matching request
    async fn send(&self, project_id: &str, command: ControlCommand) -> SyncResult<()> {
        match command {
            ControlCommand::Restart(mode) => self.restart(project_id, mode).await,
            ControlCommand::Remove => self.remove(project_id).await,
            ControlCommand::Enable => self.set_enabled(project_id, true).await,
            ControlCommand::Disable => self.set_enabled(project_id, false).await,
        }
    }
}
