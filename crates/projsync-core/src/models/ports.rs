//! Port values reported for a project's container

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Highest port number a project may expose
pub const MAX_PORT: i64 = 65535;

/// Ports of a project. Each one may be absent independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    /// Port the application is exposed on
    pub app: Option<u16>,
    /// Port the application listens on inside its container
    pub internal: Option<u16>,
    /// Exposed debug port
    pub debug: Option<u16>,
    /// Debug port inside the container
    pub internal_debug: Option<u16>,
}

/// Which of the four ports a value is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    App,
    Internal,
    Debug,
    InternalDebug,
}

impl PortKind {
    pub const ALL: [PortKind; 4] = [
        PortKind::App,
        PortKind::Internal,
        PortKind::Debug,
        PortKind::InternalDebug,
    ];
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PortKind::App => "app",
            PortKind::Internal => "internal",
            PortKind::Debug => "debug",
            PortKind::InternalDebug => "internal_debug",
        };
        f.write_str(s)
    }
}

impl Ports {
    pub fn get(&self, kind: PortKind) -> Option<u16> {
        match kind {
            PortKind::App => self.app,
            PortKind::Internal => self.internal,
            PortKind::Debug => self.debug,
            PortKind::InternalDebug => self.internal_debug,
        }
    }

    pub fn set(&mut self, kind: PortKind, value: Option<u16>) {
        let slot = match kind {
            PortKind::App => &mut self.app,
            PortKind::Internal => &mut self.internal,
            PortKind::Debug => &mut self.debug,
            PortKind::InternalDebug => &mut self.internal_debug,
        };
        *slot = value;
    }
}

/// A port value that cannot be applied
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid port value: {0}")]
pub struct InvalidPort(pub String);

/// Parse a port from its wire representation.
///
/// Numbers and numeric strings are accepted. An empty string means the port
/// was explicitly cleared and yields `Ok(None)`.
pub fn parse_port(value: &Value) -> Result<Option<u16>, InvalidPort> {
    let number = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(n) => n,
            None => return Err(InvalidPort(n.to_string())),
        },
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .map_err(|_| InvalidPort(s.to_string()))?
        }
        other => return Err(InvalidPort(other.to_string())),
    };

    if (1..=MAX_PORT).contains(&number) {
        Ok(Some(number as u16))
    } else {
        Err(InvalidPort(number.to_string()))
    }
}
