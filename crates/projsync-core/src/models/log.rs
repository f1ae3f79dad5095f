//! Log descriptors for a project

use serde::{Deserialize, Serialize};

/// One log the server can stream for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInfo {
    pub log_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_log_path: Option<String>,
}

/// Build and app logs available for a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsList {
    #[serde(default)]
    pub build: Vec<LogInfo>,
    #[serde(default)]
    pub app: Vec<LogInfo>,
}

impl LogsList {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.build
            .iter()
            .chain(self.app.iter())
            .map(|l| l.log_name.as_str())
    }
}
