//! Client configuration with YAML and TOML support

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pending::OperationKind;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Top-level client configuration
///
/// ```yaml
/// connections:
///   - id: local
///     endpoint: http://localhost:10000
/// timeouts:
///   restart_ms: 180000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Remote endpoints to mirror
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    /// Request and operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Event stream reconnect behaviour
    #[serde(default)]
    pub stream: StreamConfig,

    /// External installer used for lifecycle operations
    #[serde(default)]
    pub installer: Option<InstallerConfig>,
}

/// One remote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Local identifier of the connection
    pub id: String,

    /// Base URL of the control plane
    pub endpoint: String,

    /// Bearer token sent with every request (optional)
    #[serde(default)]
    pub token: Option<String>,

    /// Path of the event stream relative to the endpoint
    #[serde(default = "default_events_path")]
    pub events_path: String,
}

fn default_events_path() -> String {
    "/api/v1/events".to_string()
}

impl ConnectionConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            token: None,
            events_path: default_events_path(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// HTTP request timeout in milliseconds
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    /// HTTP connect timeout in milliseconds
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,

    /// Deadline for a restart to be confirmed
    #[serde(default = "default_restart_ms")]
    pub restart_ms: u64,

    /// Deadline for enabling or disabling a project
    #[serde(default = "default_toggle_ms")]
    pub toggle_ms: u64,

    /// Deadline for a deletion to be confirmed
    #[serde(default = "default_delete_ms")]
    pub delete_ms: u64,
}

fn default_request_ms() -> u64 {
    30_000
}

fn default_connect_ms() -> u64 {
    10_000
}

fn default_restart_ms() -> u64 {
    180_000
}

fn default_toggle_ms() -> u64 {
    60_000
}

fn default_delete_ms() -> u64 {
    60_000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            connect_ms: default_connect_ms(),
            restart_ms: default_restart_ms(),
            toggle_ms: default_toggle_ms(),
            delete_ms: default_delete_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Deadline for an operation of the given kind
    pub fn for_operation(&self, kind: OperationKind) -> Duration {
        let ms = match kind {
            OperationKind::Restart(_) => self.restart_ms,
            OperationKind::Enable | OperationKind::Disable => self.toggle_ms,
            OperationKind::Delete => self.delete_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Event stream reconnect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// First reconnect delay in milliseconds
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl StreamConfig {
    /// Delay before reconnect attempt `attempt` (0-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// External installer executable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Path to the installer binary
    pub executable: String,

    /// Extra arguments passed before the command name
    #[serde(default)]
    pub args: Vec<String>,
}

impl ClientConfig {
    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load configuration from a file, picking the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("toml") => Self::from_toml(&content),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Find a connection by ID
    pub fn connection(&self, id: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projsync_core::StartMode;
    use std::io::Write;

    #[test]
    fn yaml_with_defaults() {
        let config = ClientConfig::from_yaml(
            r#"
connections:
  - id: local
    endpoint: http://localhost:10000
timeouts:
  restart_ms: 1000
"#,
        )
        .unwrap();

        let conn = config.connection("local").unwrap();
        assert_eq!(conn.endpoint, "http://localhost:10000");
        assert_eq!(conn.events_path, "/api/v1/events");
        assert!(conn.token.is_none());

        assert_eq!(
            config
                .timeouts
                .for_operation(OperationKind::Restart(StartMode::Run)),
            Duration::from_millis(1000)
        );
        assert_eq!(
            config.timeouts.for_operation(OperationKind::Delete),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn toml_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[connections]]
id = "remote"
endpoint = "https://cloud.example.com"
token = "secret"

[installer]
executable = "/usr/local/bin/cwctl"
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connections[0].token.as_deref(), Some("secret"));
        assert_eq!(config.timeouts.restart_ms, 180_000);
        assert_eq!(
            config.installer.unwrap().executable,
            "/usr/local/bin/cwctl"
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let stream = StreamConfig {
            backoff_initial_ms: 100,
            backoff_max_ms: 1000,
        };
        assert_eq!(stream.backoff(0), Duration::from_millis(100));
        assert_eq!(stream.backoff(1), Duration::from_millis(200));
        assert_eq!(stream.backoff(3), Duration::from_millis(800));
        assert_eq!(stream.backoff(4), Duration::from_millis(1000));
        assert_eq!(stream.backoff(60), Duration::from_millis(1000));
    }
}
