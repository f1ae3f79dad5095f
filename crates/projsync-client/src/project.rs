//! Local mirror of one remote project
//!
//! A [`Project`] is only ever mutated through [`Project::apply_update`], which
//! takes a partial snapshot and reports whether anything observable changed.
//! Applying the same snapshot twice is a no-op the second time.

use chrono::{DateTime, Utc};
use projsync_core::{
    compute_app_state, compute_build_state, is_closed_state, parse_port, parse_timestamp,
    AppState, BuildState, IncomingLink, Patch, PortKind, Ports, PortsPatch, ProjectCapabilities,
    ProjectLink, ProjectSnapshot, ProjectState, RawAppStatus, StartMode, SyncError, SyncResult,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// A project flipped between enabled and disabled during an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementChange {
    Enabled,
    Disabled,
}

/// What an update did to a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Any observable field changed
    pub changed: bool,
    /// The update enabled or disabled the project
    pub enablement: Option<EnablementChange>,
    /// Outgoing links changed, so incoming links elsewhere must be derived again
    pub links_changed: bool,
    /// Capabilities must be requested from the backend
    pub needs_capabilities: bool,
}

/// Local mirror of a remote project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    id: String,
    connection_id: String,
    name: String,
    state: ProjectState,
    start_mode: StartMode,
    auto_build: bool,
    ports: Ports,
    container_id: Option<String>,
    last_build: Option<DateTime<Utc>>,
    last_image_build: Option<DateTime<Utc>>,
    outgoing_links: Vec<ProjectLink>,
    incoming_links: Vec<IncomingLink>,
    capabilities: Option<ProjectCapabilities>,
}

impl Project {
    /// A project we know nothing about yet besides its identity
    pub fn new(id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            connection_id: connection_id.into(),
            state: ProjectState::default(),
            start_mode: StartMode::Run,
            auto_build: false,
            ports: Ports::default(),
            container_id: None,
            last_build: None,
            last_image_build: None,
            outgoing_links: Vec::new(),
            incoming_links: Vec::new(),
            capabilities: None,
        }
    }

    /// Create a project from a discovery snapshot
    pub fn from_snapshot(
        connection_id: impl Into<String>,
        snapshot: &ProjectSnapshot,
    ) -> SyncResult<(Self, UpdateOutcome)> {
        let id = snapshot
            .project_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::Protocol("snapshot without projectID".to_string()))?;

        let mut project = Self::new(id, connection_id);
        let mut outcome = project.apply_update(snapshot)?;
        // A fresh project has nothing to transition from
        outcome.enablement = None;
        outcome.needs_capabilities = project.is_enabled() && project.capabilities.is_none();
        Ok((project, outcome))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProjectState {
        self.state
    }

    pub fn app_state(&self) -> AppState {
        self.state.app()
    }

    pub fn build_state(&self) -> BuildState {
        self.state.build()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    pub fn auto_build(&self) -> bool {
        self.auto_build
    }

    pub fn ports(&self) -> Ports {
        self.ports
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn last_build(&self) -> Option<DateTime<Utc>> {
        self.last_build
    }

    pub fn last_image_build(&self) -> Option<DateTime<Utc>> {
        self.last_image_build
    }

    pub fn outgoing_links(&self) -> &[ProjectLink] {
        &self.outgoing_links
    }

    pub fn incoming_links(&self) -> &[IncomingLink] {
        &self.incoming_links
    }

    pub fn capabilities(&self) -> Option<&ProjectCapabilities> {
        self.capabilities.as_ref()
    }

    /// Apply a partial snapshot.
    ///
    /// Fields absent from the snapshot keep their value; explicitly cleared
    /// fields are reset. Invalid port and timestamp values are logged and
    /// skipped. A snapshot addressed to a different project is refused.
    pub fn apply_update(&mut self, snapshot: &ProjectSnapshot) -> SyncResult<UpdateOutcome> {
        if let Some(target) = snapshot.project_id.as_deref() {
            if target != self.id {
                error!(
                    project_id = %self.id,
                    target = %target,
                    "Refusing update addressed to another project"
                );
                return Err(SyncError::InvalidState(format!(
                    "update for {} routed to {}",
                    target, self.id
                )));
            }
        }

        let was_enabled = self.is_enabled();
        let mut outcome = UpdateOutcome::default();
        let mut changed = false;

        if let Patch::Set(name) = &snapshot.name {
            changed |= replace(&mut self.name, name.clone());
        }

        let previous_mode = self.start_mode;
        if let Patch::Set(mode) = snapshot.start_mode {
            changed |= replace(&mut self.start_mode, mode);
        }

        let state = self.next_state(snapshot, previous_mode);
        changed |= replace(&mut self.state, state);

        if let Patch::Set(auto_build) = snapshot.auto_build {
            changed |= replace(&mut self.auto_build, auto_build);
        }

        if let Some(ports) = &snapshot.ports {
            changed |= self.apply_ports(ports);
        }

        // A disabled project holds no runtime data, whatever the snapshot says
        let disabled = !self.is_enabled();

        match &snapshot.container_id {
            Patch::Absent => {}
            _ if disabled => {}
            Patch::Cleared => changed |= replace(&mut self.container_id, None),
            Patch::Set(id) => {
                let id = Some(id.clone()).filter(|id| !id.is_empty());
                changed |= replace(&mut self.container_id, id);
            }
        }

        changed |= apply_timestamp(
            &self.id,
            "lastbuild",
            &snapshot.last_build,
            &mut self.last_build,
        );
        changed |= apply_timestamp(
            &self.id,
            "appImageLastBuild",
            &snapshot.app_image_last_build,
            &mut self.last_image_build,
        );

        match &snapshot.links {
            Patch::Absent => {}
            Patch::Cleared => outcome.links_changed = replace(&mut self.outgoing_links, Vec::new()),
            Patch::Set(links) => {
                outcome.links_changed = replace(&mut self.outgoing_links, links.clone())
            }
        }
        changed |= outcome.links_changed;

        match &snapshot.capabilities {
            Patch::Absent => {}
            _ if disabled => {}
            Patch::Cleared => changed |= replace(&mut self.capabilities, None),
            Patch::Set(caps) => changed |= replace(&mut self.capabilities, Some(caps.clone())),
        }

        outcome.enablement = match (was_enabled, self.is_enabled()) {
            (true, false) => {
                self.on_disabled();
                Some(EnablementChange::Disabled)
            }
            (false, true) => {
                outcome.needs_capabilities = self.capabilities.is_none();
                Some(EnablementChange::Enabled)
            }
            _ => None,
        };

        outcome.changed = changed;
        if changed {
            debug!(project_id = %self.id, state = %self.state, "Project updated");
        }
        Ok(outcome)
    }

    /// Replace the derived incoming links; returns whether they changed
    pub(crate) fn set_incoming_links(&mut self, links: Vec<IncomingLink>) -> bool {
        replace(&mut self.incoming_links, links)
    }

    fn next_state(&self, snapshot: &ProjectSnapshot, previous_mode: StartMode) -> ProjectState {
        if !snapshot.touches_state() {
            if self.start_mode != previous_mode {
                return ProjectState::new(
                    reinterpret(self.state.app(), self.start_mode),
                    self.state.build(),
                );
            }
            return self.state;
        }

        let closed = match &snapshot.state {
            Patch::Set(state) => is_closed_state(Some(state)),
            Patch::Cleared => false,
            Patch::Absent => !self.is_enabled(),
        };

        let app = match &snapshot.app_status {
            Patch::Set(status) => compute_app_state(&RawAppStatus {
                status: Some(status),
                closed,
                start_mode: self.start_mode,
            }),
            Patch::Cleared => compute_app_state(&RawAppStatus {
                status: None,
                closed,
                start_mode: self.start_mode,
            }),
            Patch::Absent if closed => AppState::Disabled,
            // Reopened without a status; wait for the server to tell us
            Patch::Absent if !self.is_enabled() => AppState::Unknown,
            Patch::Absent => reinterpret(self.state.app(), self.start_mode),
        };

        let build = match &snapshot.build_status {
            Patch::Set(status) => compute_build_state(Some(status)),
            Patch::Cleared => BuildState::Unknown,
            Patch::Absent => self.state.build(),
        };

        ProjectState::new(app, build)
    }

    fn apply_ports(&mut self, patch: &PortsPatch) -> bool {
        let mut changed = false;
        for kind in PortKind::ALL {
            let value = match kind {
                PortKind::App => &patch.exposed_port,
                PortKind::Internal => &patch.internal_port,
                PortKind::Debug => &patch.exposed_debug_port,
                PortKind::InternalDebug => &patch.internal_debug_port,
            };
            let port = match value {
                Patch::Absent => continue,
                Patch::Cleared => None,
                Patch::Set(raw) => match parse_port(raw) {
                    Ok(port) => port,
                    Err(e) => {
                        warn!(project_id = %self.id, port = %kind, "Ignoring port update: {}", e);
                        continue;
                    }
                },
            };
            if self.ports.get(kind) != port {
                self.ports.set(kind, port);
                changed = true;
            }
        }
        changed
    }

    /// Runtime data is meaningless for a disabled project
    fn on_disabled(&mut self) {
        self.container_id = None;
        self.capabilities = None;
    }
}

/// Map a running state onto the variant matching the start mode
fn reinterpret(app: AppState, mode: StartMode) -> AppState {
    match app {
        AppState::Started | AppState::Debugging if mode.is_debug() => AppState::Debugging,
        AppState::Started | AppState::Debugging => AppState::Started,
        AppState::Starting | AppState::DebugStarting if mode.is_debug() => AppState::DebugStarting,
        AppState::Starting | AppState::DebugStarting => AppState::Starting,
        other => other,
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn apply_timestamp(
    project_id: &str,
    field: &str,
    patch: &Patch<Value>,
    slot: &mut Option<DateTime<Utc>>,
) -> bool {
    match patch {
        Patch::Absent => false,
        Patch::Cleared => replace(slot, None),
        Patch::Set(raw) => match parse_timestamp(raw) {
            Some(ts) => replace(slot, Some(ts)),
            None => {
                warn!(project_id = %project_id, field, value = %raw, "Ignoring invalid timestamp");
                false
            }
        },
    }
}
