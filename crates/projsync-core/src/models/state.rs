//! Project lifecycle states and the pure functions that derive them from wire values
//!
//! The server reports status as loose strings. Everything in here is total:
//! unknown or garbage input maps to `Unknown` (and is logged), nothing panics.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application state of a project.
///
/// ```text
///            ┌────────────── Disabled ◄──── (closed, from any state)
///            │
///  Stopped ──► Starting ──► Started ──► Stopping ──► Stopped
///      │
///      └─────► DebugStarting ──► Debugging ──► Stopping
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Unknown,
    Stopped,
    Starting,
    Started,
    Stopping,
    DebugStarting,
    Debugging,
    Disabled,
}

impl AppState {
    /// Running in either run or debug mode
    pub fn is_started(&self) -> bool {
        matches!(self, AppState::Started | AppState::Debugging)
    }

    pub fn is_starting(&self) -> bool {
        matches!(self, AppState::Starting | AppState::DebugStarting)
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, AppState::DebugStarting | AppState::Debugging)
    }

    pub fn is_enabled(&self) -> bool {
        *self != AppState::Disabled
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppState::Unknown => "unknown",
            AppState::Stopped => "stopped",
            AppState::Starting => "starting",
            AppState::Started => "started",
            AppState::Stopping => "stopping",
            AppState::DebugStarting => "debug_starting",
            AppState::Debugging => "debugging",
            AppState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Build state of a project. Disabled projects always report `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Unknown,
    Queued,
    Building,
    Succeeded,
    Failed,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildState::Unknown => "unknown",
            BuildState::Queued => "queued",
            BuildState::Building => "building",
            BuildState::Succeeded => "succeeded",
            BuildState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mode the project's application was (or is to be) started in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StartMode {
    #[default]
    Run,
    Debug,
    DebugNoInit,
    /// Any mode string this client does not know
    Other,
}

impl StartMode {
    /// Lenient parse of the wire value
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "run" => StartMode::Run,
            "debug" => StartMode::Debug,
            "debugNoInit" => StartMode::DebugNoInit,
            other => {
                warn!(start_mode = other, "Unrecognized start mode");
                StartMode::Other
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StartMode::Run => "run",
            StartMode::Debug => "debug",
            StartMode::DebugNoInit => "debugNoInit",
            StartMode::Other => "other",
        }
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, StartMode::Debug | StartMode::DebugNoInit)
    }
}

impl std::fmt::Display for StartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StartMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StartMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(StartMode::parse(&value))
    }
}

/// Raw application status as it appears on the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct RawAppStatus<'a> {
    /// `appStatus` string, if any
    pub status: Option<&'a str>,
    /// Whether the project is closed (`state: "closed"`)
    pub closed: bool,
    /// Start mode in effect for this snapshot
    pub start_mode: StartMode,
}

/// Whether a wire `state` value means the project is closed (disabled)
pub fn is_closed_state(state: Option<&str>) -> bool {
    state.is_some_and(|s| s.trim().eq_ignore_ascii_case("closed"))
}

/// Compute the application state for a raw status snapshot.
///
/// Closed overrides everything. Started/starting are upgraded to their debug
/// variants when the start mode is a debug mode.
pub fn compute_app_state(raw: &RawAppStatus<'_>) -> AppState {
    if raw.closed {
        return AppState::Disabled;
    }

    let Some(status) = raw.status else {
        return AppState::Unknown;
    };

    let debug = raw.start_mode.is_debug();
    match status.trim().to_ascii_lowercase().as_str() {
        "started" if debug => AppState::Debugging,
        "started" => AppState::Started,
        "starting" if debug => AppState::DebugStarting,
        "starting" => AppState::Starting,
        "stopping" => AppState::Stopping,
        "stopped" => AppState::Stopped,
        "" | "unknown" => AppState::Unknown,
        other => {
            warn!(status = other, "Unrecognized app status, treating as unknown");
            AppState::Unknown
        }
    }
}

/// Compute the build state for a raw `buildStatus` value
pub fn compute_build_state(status: Option<&str>) -> BuildState {
    let Some(status) = status else {
        return BuildState::Unknown;
    };

    match status.trim().to_ascii_lowercase().as_str() {
        "queued" => BuildState::Queued,
        "inprogress" | "building" => BuildState::Building,
        "success" | "succeeded" => BuildState::Succeeded,
        "failed" => BuildState::Failed,
        "" | "unknown" | "notbuilt" => BuildState::Unknown,
        other => {
            warn!(status = other, "Unrecognized build status, treating as unknown");
            BuildState::Unknown
        }
    }
}

/// Combined project state.
///
/// The constructor enforces that a disabled project carries no build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectState {
    app: AppState,
    build: BuildState,
}

impl ProjectState {
    pub fn new(app: AppState, build: BuildState) -> Self {
        let build = if app == AppState::Disabled {
            BuildState::Unknown
        } else {
            build
        };
        Self { app, build }
    }

    pub fn app(&self) -> AppState {
        self.app
    }

    pub fn build(&self) -> BuildState {
        self.build
    }

    pub fn is_enabled(&self) -> bool {
        self.app.is_enabled()
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.app == AppState::Disabled || self.build == BuildState::Unknown {
            write!(f, "[{}]", self.app)
        } else {
            write!(f, "[{}] [build {}]", self.app, self.build)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: Option<&str>, closed: bool, start_mode: StartMode) -> RawAppStatus<'_> {
        RawAppStatus {
            status,
            closed,
            start_mode,
        }
    }

    #[test]
    fn closed_overrides_status() {
        assert_eq!(
            compute_app_state(&raw(Some("started"), true, StartMode::Debug)),
            AppState::Disabled
        );
        assert_eq!(
            compute_app_state(&raw(None, true, StartMode::Run)),
            AppState::Disabled
        );
    }

    #[test]
    fn debug_mode_upgrades_running_states() {
        assert_eq!(
            compute_app_state(&raw(Some("started"), false, StartMode::Debug)),
            AppState::Debugging
        );
        assert_eq!(
            compute_app_state(&raw(Some("starting"), false, StartMode::DebugNoInit)),
            AppState::DebugStarting
        );
        assert_eq!(
            compute_app_state(&raw(Some("stopping"), false, StartMode::Debug)),
            AppState::Stopping
        );
    }

    #[test]
    fn run_mode_states() {
        assert_eq!(
            compute_app_state(&raw(Some("started"), false, StartMode::Run)),
            AppState::Started
        );
        assert_eq!(
            compute_app_state(&raw(Some("Starting"), false, StartMode::Run)),
            AppState::Starting
        );
        assert_eq!(
            compute_app_state(&raw(Some("stopped"), false, StartMode::Other)),
            AppState::Stopped
        );
    }

    #[test]
    fn garbage_maps_to_unknown() {
        for status in ["", "   ", "bogus", "🚀", "started!"] {
            assert_eq!(
                compute_app_state(&raw(Some(status), false, StartMode::Run)),
                AppState::Unknown,
                "status {:?}",
                status
            );
            assert_eq!(compute_build_state(Some(status)), BuildState::Unknown);
        }
        assert_eq!(
            compute_app_state(&raw(None, false, StartMode::Run)),
            AppState::Unknown
        );
        assert_eq!(compute_build_state(None), BuildState::Unknown);
    }

    #[test]
    fn build_states() {
        assert_eq!(compute_build_state(Some("queued")), BuildState::Queued);
        assert_eq!(compute_build_state(Some("inProgress")), BuildState::Building);
        assert_eq!(compute_build_state(Some("success")), BuildState::Succeeded);
        assert_eq!(compute_build_state(Some("failed")), BuildState::Failed);
    }

    #[test]
    fn disabled_state_drops_build() {
        let state = ProjectState::new(AppState::Disabled, BuildState::Failed);
        assert_eq!(state.build(), BuildState::Unknown);
        assert!(!state.is_enabled());

        let state = ProjectState::new(AppState::Started, BuildState::Failed);
        assert_eq!(state.build(), BuildState::Failed);
    }

    #[test]
    fn closed_state_detection() {
        assert!(is_closed_state(Some("closed")));
        assert!(is_closed_state(Some("CLOSED")));
        assert!(!is_closed_state(Some("open")));
        assert!(!is_closed_state(None));
    }

    #[test]
    fn start_mode_round_trip_through_serde() {
        let mode: StartMode = serde_json::from_str("\"debugNoInit\"").unwrap();
        assert_eq!(mode, StartMode::DebugNoInit);
        assert_eq!(serde_json::to_string(&mode).unwrap(), "\"debugNoInit\"");

        let mode: StartMode = serde_json::from_str("\"profile\"").unwrap();
        assert_eq!(mode, StartMode::Other);
    }
}
