//! Partial project snapshots as pushed by the server
//!
//! A snapshot may carry any subset of fields. A field that is missing from the
//! payload means "no opinion, keep what you have"; a field that is present but
//! `null` (or an empty string, for the fields where that makes sense) means
//! "explicitly cleared". [`Patch`] keeps those two apart.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::capabilities::ProjectCapabilities;
use super::state::StartMode;

/// A single field of a partial snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    /// Field missing from the payload
    Absent,
    /// Field present as `null`
    Cleared,
    /// Field present with a value
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Absent
    }
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Cleared => Patch::Cleared,
            Patch::Set(v) => Patch::Set(v),
        }
    }

    /// `None` when absent, `Some(None)` when cleared, `Some(Some(v))` when set
    pub fn into_option(self) -> Option<Option<T>> {
        match self {
            Patch::Absent => None,
            Patch::Cleared => Some(None),
            Patch::Set(v) => Some(Some(v)),
        }
    }

    /// The value if set
    pub fn value(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Cleared,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

/// Port fields of a snapshot, still in wire form
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortsPatch {
    #[serde(default)]
    pub exposed_port: Patch<Value>,
    #[serde(default)]
    pub internal_port: Patch<Value>,
    #[serde(default)]
    pub exposed_debug_port: Patch<Value>,
    #[serde(default)]
    pub internal_debug_port: Patch<Value>,
}

/// An outgoing link from one project to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLink {
    /// Target project
    #[serde(rename = "projectID")]
    pub project_id: String,
    /// Environment variable the target URL is injected as
    pub env_name: String,
    #[serde(default, rename = "projectURL", skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
}

/// A link into this project, derived from another project's outgoing links
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncomingLink {
    /// Project the link originates from
    pub source_project_id: String,
    pub env_name: String,
}

/// Partial view of a project's server-side state
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    /// Project this snapshot describes
    #[serde(default, rename = "projectID")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub name: Patch<String>,
    /// "open" or "closed"
    #[serde(default)]
    pub state: Patch<String>,
    #[serde(default)]
    pub app_status: Patch<String>,
    #[serde(default)]
    pub build_status: Patch<String>,
    #[serde(default)]
    pub start_mode: Patch<StartMode>,
    #[serde(default)]
    pub auto_build: Patch<bool>,
    #[serde(default)]
    pub ports: Option<PortsPatch>,
    #[serde(default, rename = "containerId")]
    pub container_id: Patch<String>,
    /// Milliseconds since the epoch, number or numeric string
    #[serde(default, rename = "lastbuild")]
    pub last_build: Patch<Value>,
    #[serde(default)]
    pub app_image_last_build: Patch<Value>,
    #[serde(default)]
    pub links: Patch<Vec<ProjectLink>>,
    #[serde(default)]
    pub capabilities: Patch<ProjectCapabilities>,
}

impl ProjectSnapshot {
    /// Empty snapshot for a project; every field absent
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Patch::Set(name.into());
        self
    }

    pub fn with_app_status(mut self, status: impl Into<String>) -> Self {
        self.app_status = Patch::Set(status.into());
        self
    }

    pub fn with_build_status(mut self, status: impl Into<String>) -> Self {
        self.build_status = Patch::Set(status.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Patch::Set(state.into());
        self
    }

    pub fn closed(self) -> Self {
        self.with_state("closed")
    }

    pub fn open(self) -> Self {
        self.with_state("open")
    }

    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = Patch::Set(mode);
        self
    }

    pub fn with_auto_build(mut self, enabled: bool) -> Self {
        self.auto_build = Patch::Set(enabled);
        self
    }

    pub fn with_container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Patch::Set(id.into());
        self
    }

    pub fn with_ports(mut self, ports: PortsPatch) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn with_app_port(mut self, port: impl Into<Value>) -> Self {
        self.ports.get_or_insert_with(PortsPatch::default).exposed_port = Patch::Set(port.into());
        self
    }

    pub fn with_debug_port(mut self, port: impl Into<Value>) -> Self {
        self.ports
            .get_or_insert_with(PortsPatch::default)
            .exposed_debug_port = Patch::Set(port.into());
        self
    }

    pub fn with_links(mut self, links: Vec<ProjectLink>) -> Self {
        self.links = Patch::Set(links);
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProjectCapabilities) -> Self {
        self.capabilities = Patch::Set(capabilities);
        self
    }

    /// Whether the snapshot says anything about the app/build state
    pub fn touches_state(&self) -> bool {
        !self.state.is_absent() || !self.app_status.is_absent() || !self.build_status.is_absent()
    }
}

/// Parse a wire timestamp (milliseconds since the epoch) into an instant.
///
/// Returns `None` for anything that is not a positive millisecond count.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}
