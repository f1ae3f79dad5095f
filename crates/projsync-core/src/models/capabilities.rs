//! Capabilities a project advertises once its backend is ready

use serde::{Deserialize, Serialize};

use super::state::StartMode;

/// What a project supports. Only known after the backend signals readiness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCapabilities {
    /// Start modes the project can be restarted into
    #[serde(default)]
    pub start_modes: Vec<StartMode>,
    /// Control commands the project accepts (e.g. "restart")
    #[serde(default)]
    pub control_commands: Vec<String>,
}

impl ProjectCapabilities {
    pub fn supports_start_mode(&self, mode: StartMode) -> bool {
        self.start_modes.contains(&mode)
    }

    pub fn supports_restart(&self) -> bool {
        self.control_commands.iter().any(|c| c == "restart")
    }

    pub fn supports_debug(&self) -> bool {
        self.start_modes.iter().any(StartMode::is_debug)
    }
}
