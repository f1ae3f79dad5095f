//! Connection - owns the project mirror of one remote endpoint
//!
//! The project collection is only mutated by the event router and by resync.
//! Readers always get cloned, fully applied snapshots of a project; there is no
//! way to observe a half-applied update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use projsync_core::{
    AppState, ControlBackend, IncomingLink, LogsList, ProjectCapabilities, ProjectSnapshot, RawEvent,
    StartMode, SyncError, SyncResult,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::TimeoutsConfig;
use crate::pending::{
    Confirmation, OperationKind, PendingHandle, PendingOperation, PendingTracker,
};
use crate::project::{EnablementChange, Project, UpdateOutcome};
use crate::router::EventRouter;

/// Capacity of the change and log broadcast channels
const CHANNEL_CAPACITY: usize = 1024;

/// What changed on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    /// One project changed in place
    Project(String),
    /// The project list itself changed, or everything should be re-read
    Root,
}

/// Log traffic for a project
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub project_id: String,
    pub kind: LogEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEventKind {
    /// New output for one log
    Update {
        log_name: String,
        logs: String,
        reset: bool,
    },
    /// The set of available logs changed
    ListChanged(LogsList),
}

/// Link health of a connection. Both flags must be set for it to be usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub connected: bool,
    pub authorized: bool,
}

/// Work items for the connection's event router, processed strictly in order
#[derive(Debug)]
pub(crate) enum RouterInput {
    Event {
        raw: RawEvent,
        /// Resyncs completed when the event was queued
        resyncs_seen: u64,
    },
    Capabilities {
        project_id: String,
        result: SyncResult<ProjectCapabilities>,
    },
    Resync {
        /// Resyncs completed when this one was requested
        resyncs_seen: u64,
    },
}

/// A remote endpoint and the projects it manages
pub struct Connection {
    id: String,
    endpoint: Url,
    backend: Arc<dyn ControlBackend>,
    timeouts: TimeoutsConfig,
    status: RwLock<LinkStatus>,
    projects: RwLock<Vec<Project>>,
    pending: Arc<PendingTracker>,
    changes: broadcast::Sender<ChangeNotice>,
    logs: broadcast::Sender<LogEvent>,
    resync_lock: tokio::sync::Mutex<()>,
    resync_generation: AtomicU64,
    last_resync: Mutex<Option<SyncResult<()>>>,
    inbox: mpsc::UnboundedSender<RouterInput>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection and start its event router.
    ///
    /// The connection starts connected and authorized with no projects; call
    /// [`Connection::refresh_all`] to populate it.
    pub fn new(
        id: impl Into<String>,
        endpoint: Url,
        backend: Arc<dyn ControlBackend>,
        timeouts: TimeoutsConfig,
    ) -> Arc<Self> {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (logs, _) = broadcast::channel(CHANNEL_CAPACITY);

        let connection = Arc::new(Self {
            id: id.into(),
            endpoint,
            backend,
            timeouts,
            status: RwLock::new(LinkStatus {
                connected: true,
                authorized: true,
            }),
            projects: RwLock::new(Vec::new()),
            pending: PendingTracker::new(),
            changes,
            logs,
            resync_lock: tokio::sync::Mutex::new(()),
            resync_generation: AtomicU64::new(0),
            last_resync: Mutex::new(None),
            inbox,
            router_task: Mutex::new(None),
        });

        let task = EventRouter::new(Arc::downgrade(&connection)).spawn(rx);
        *connection.router_task.lock() = Some(task);

        info!(connection_id = %connection.id, endpoint = %connection.endpoint, "Connection created");
        connection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().connected
    }

    pub fn is_authorized(&self) -> bool {
        self.status.read().authorized
    }

    /// Connected and authorized
    pub fn is_usable(&self) -> bool {
        let status = self.status.read();
        status.connected && status.authorized
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All projects, in discovery order
    pub fn list_projects(&self) -> Vec<Project> {
        self.projects.read().clone()
    }

    pub fn get_project(&self, project_id: &str) -> Option<Project> {
        self.projects
            .read()
            .iter()
            .find(|p| p.id() == project_id)
            .cloned()
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.projects.read().iter().any(|p| p.id() == project_id)
    }

    /// Current pending operation of a project
    pub fn pending_operation(&self, project_id: &str) -> Option<PendingOperation> {
        self.pending.get(project_id)
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }

    /// Receive log traffic
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs.subscribe()
    }

    // =========================================================================
    // Inbound events
    // =========================================================================

    /// Queue a raw push event for ordered processing
    pub fn submit(&self, event: RawEvent) {
        let input = RouterInput::Event {
            raw: event,
            resyncs_seen: self.resync_count(),
        };
        if self.inbox.send(input).is_err() {
            warn!(connection_id = %self.id, "Event router stopped, dropping event");
        }
    }

    /// Re-fetch the whole project list and merge it into the mirror.
    ///
    /// Requests that arrive while a resync is in flight wait for it and share
    /// its result instead of starting another one.
    pub async fn refresh_all(&self) -> SyncResult<()> {
        let requested_at = self.resync_generation.load(Ordering::SeqCst);
        let _guard = self.resync_lock.lock().await;

        if self.resync_generation.load(Ordering::SeqCst) != requested_at {
            debug!(connection_id = %self.id, "Resync coalesced with the one in flight");
            return self
                .last_resync
                .lock()
                .clone()
                .unwrap_or(Ok(()));
        }

        info!(connection_id = %self.id, "Resyncing project list");
        let result = match self.backend.list_projects().await {
            Ok(snapshots) => {
                self.merge_listing(snapshots);
                Ok(())
            }
            Err(e) => {
                warn!(connection_id = %self.id, "Resync failed: {}", e);
                if matches!(e, SyncError::Unauthorized(_)) {
                    self.set_authorized(false);
                }
                Err(e)
            }
        };

        *self.last_resync.lock() = Some(result.clone());
        self.resync_generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Number of resyncs that have completed
    pub fn resync_count(&self) -> u64 {
        self.resync_generation.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Restart a project. The handle resolves once the restart is confirmed.
    pub async fn restart(&self, project_id: &str, mode: StartMode) -> SyncResult<PendingHandle> {
        self.start_operation(project_id, OperationKind::Restart(mode))
            .await
    }

    pub async fn enable(&self, project_id: &str) -> SyncResult<PendingHandle> {
        self.start_operation(project_id, OperationKind::Enable).await
    }

    pub async fn disable(&self, project_id: &str) -> SyncResult<PendingHandle> {
        self.start_operation(project_id, OperationKind::Disable)
            .await
    }

    pub async fn remove(&self, project_id: &str) -> SyncResult<PendingHandle> {
        self.start_operation(project_id, OperationKind::Delete).await
    }

    /// Cancel a project's pending operation on user request
    pub fn cancel_operation(&self, project_id: &str) -> bool {
        self.pending.cancel(project_id, "cancelled by user")
    }

    async fn start_operation(
        &self,
        project_id: &str,
        kind: OperationKind,
    ) -> SyncResult<PendingHandle> {
        self.ensure_usable()?;
        let project = self
            .get_project(project_id)
            .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string()))?;
        check_allowed(&project, kind)?;

        let handle = self.pending.begin(
            project_id,
            kind,
            project.app_state(),
            self.timeouts.for_operation(kind),
        )?;

        if let Err(e) = self.backend.send(project_id, kind.command()).await {
            warn!(project_id, operation = %kind, "Backend rejected request: {}", e);
            self.pending
                .abort_operation(project_id, handle.operation_id(), &e.to_string());
            if matches!(e, SyncError::Unauthorized(_)) {
                self.set_authorized(false);
            }
            return Err(e);
        }

        debug!(project_id, operation = %kind, "Request accepted, awaiting confirmation");
        Ok(handle)
    }

    fn ensure_usable(&self) -> SyncResult<()> {
        let status = self.status();
        if !status.connected {
            return Err(SyncError::NotUsable(format!("{} is disconnected", self.id)));
        }
        if !status.authorized {
            return Err(SyncError::NotUsable(format!("{} is not authorized", self.id)));
        }
        Ok(())
    }

    // =========================================================================
    // Link status
    // =========================================================================

    /// Record transport state. Losing the link fails all pending operations;
    /// regaining it queues a resync.
    pub fn set_connected(&self, connected: bool) {
        let previous = std::mem::replace(&mut self.status.write().connected, connected);
        if previous == connected {
            return;
        }

        if connected {
            info!(connection_id = %self.id, "Connection restored");
            self.queue_resync();
        } else {
            warn!(connection_id = %self.id, "Connection lost");
            self.pending.abort_all("connection lost");
        }
        self.notify(ChangeNotice::Root);
    }

    /// Record authorization state; same recovery rules as [`Connection::set_connected`]
    pub fn set_authorized(&self, authorized: bool) {
        let previous = std::mem::replace(&mut self.status.write().authorized, authorized);
        if previous == authorized {
            return;
        }

        if authorized {
            info!(connection_id = %self.id, "Connection authorized");
            self.queue_resync();
        } else {
            warn!(connection_id = %self.id, "Connection no longer authorized");
            self.pending.abort_all("connection is not authorized");
        }
        self.notify(ChangeNotice::Root);
    }

    /// Tear down: fail pending operations and stop the router
    pub fn dispose(&self) {
        info!(connection_id = %self.id, "Disposing connection");
        self.pending.abort_all("connection removed");
        self.status.write().connected = false;
        if let Some(task) = self.router_task.lock().take() {
            task.abort();
        }
    }

    /// The event stream (re)opened. Anything the server pushed before it
    /// was up is lost, so resync even when the link never looked down.
    pub(crate) fn stream_opened(&self) {
        self.set_authorized(true);
        if self.is_connected() {
            self.queue_resync();
        } else {
            self.set_connected(true);
        }
    }

    fn queue_resync(&self) {
        let input = RouterInput::Resync {
            resyncs_seen: self.resync_count(),
        };
        if self.inbox.send(input).is_err() {
            warn!(connection_id = %self.id, "Event router stopped, cannot resync");
        }
    }

    // =========================================================================
    // Mutation (router and resync only)
    // =========================================================================

    /// Apply a snapshot to a known project and settle everything that depends on it
    pub(crate) fn apply_update(
        &self,
        project_id: &str,
        snapshot: &ProjectSnapshot,
    ) -> SyncResult<UpdateOutcome> {
        let (outcome, app, link_changes) = {
            let mut projects = self.projects.write();
            let project = projects
                .iter_mut()
                .find(|p| p.id() == project_id)
                .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string()))?;
            let outcome = project.apply_update(snapshot)?;
            let app = project.app_state();
            let link_changes = if outcome.links_changed {
                derive_incoming_links(&mut projects)
            } else {
                Vec::new()
            };
            (outcome, app, link_changes)
        };

        if outcome.changed {
            self.notify(ChangeNotice::Project(project_id.to_string()));
        }
        for id in link_changes.into_iter().filter(|id| id != project_id) {
            self.notify(ChangeNotice::Project(id));
        }
        self.settle(project_id, &outcome, app);
        Ok(outcome)
    }

    /// Remove a deleted project. Returns false if it was not known.
    pub(crate) fn delete_project(&self, project_id: &str) -> bool {
        let link_changes = {
            let mut projects = self.projects.write();
            let Some(pos) = projects.iter().position(|p| p.id() == project_id) else {
                return false;
            };
            projects.remove(pos);
            derive_incoming_links(&mut projects)
        };

        info!(project_id, "Project deleted");
        self.pending.confirm(project_id, &Confirmation::Deleted);
        self.pending
            .abort_unless(project_id, OperationKind::Delete, "project was deleted");

        self.notify(ChangeNotice::Root);
        for id in link_changes {
            self.notify(ChangeNotice::Project(id));
        }
        true
    }

    /// Forward a confirmation event to the project's pending operation
    pub(crate) fn confirm(&self, project_id: &str, confirmation: Confirmation) {
        if !self.pending.confirm(project_id, &confirmation) {
            debug!(project_id, ?confirmation, "Confirmation with no matching operation");
        }
    }

    pub(crate) fn publish_log(&self, event: LogEvent) {
        // No subscribers is fine
        let _ = self.logs.send(event);
    }

    /// Merge an authoritative listing: update known projects, add new ones,
    /// drop the ones the server no longer has.
    fn merge_listing(&self, snapshots: Vec<ProjectSnapshot>) {
        let mut settled: Vec<(String, UpdateOutcome, AppState)> = Vec::new();
        let mut removed: Vec<String> = Vec::new();

        {
            let mut projects = self.projects.write();
            let mut seen: Vec<String> = Vec::with_capacity(snapshots.len());

            for snapshot in &snapshots {
                let Some(project_id) = snapshot.project_id.clone().filter(|id| !id.is_empty())
                else {
                    warn!(connection_id = %self.id, "Listing entry without projectID, skipping");
                    continue;
                };

                let result = match projects.iter_mut().find(|p| p.id() == project_id) {
                    Some(project) => project
                        .apply_update(snapshot)
                        .map(|outcome| (outcome, project.app_state())),
                    None => Project::from_snapshot(&self.id, snapshot).map(|(project, outcome)| {
                        let app = project.app_state();
                        debug!(project_id = %project_id, "Discovered project");
                        projects.push(project);
                        (outcome, app)
                    }),
                };

                match result {
                    Ok((outcome, app)) => settled.push((project_id.clone(), outcome, app)),
                    Err(e) => warn!(project_id = %project_id, "Skipping listing entry: {}", e),
                }
                seen.push(project_id);
            }

            projects.retain(|p| {
                let keep = seen.iter().any(|id| id == p.id());
                if !keep {
                    removed.push(p.id().to_string());
                }
                keep
            });

            derive_incoming_links(&mut projects);
        }

        for project_id in &removed {
            info!(project_id = %project_id, "Project no longer listed, removing");
            self.pending.confirm(project_id, &Confirmation::Deleted);
            self.pending
                .abort_unless(project_id, OperationKind::Delete, "project was deleted");
        }
        for (project_id, outcome, app) in &settled {
            self.settle(project_id, outcome, *app);
        }

        self.notify(ChangeNotice::Root);
    }

    /// Lifecycle hooks and pending-operation re-evaluation after an update
    fn settle(&self, project_id: &str, outcome: &UpdateOutcome, app: AppState) {
        match outcome.enablement {
            Some(EnablementChange::Disabled) => {
                self.pending
                    .abort_unless(project_id, OperationKind::Disable, "project was disabled");
            }
            Some(EnablementChange::Enabled) => {
                self.pending.confirm(project_id, &Confirmation::Enabled);
            }
            None => {}
        }

        if outcome.needs_capabilities {
            self.request_capabilities(project_id);
        }

        if outcome.changed {
            self.pending.observe_state(project_id, app);
        }
    }

    /// Fetch capabilities in the background; the result comes back through the router
    fn request_capabilities(&self, project_id: &str) {
        let backend = self.backend.clone();
        let inbox = self.inbox.clone();
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            let result = backend.get_capabilities(&project_id).await;
            let _ = inbox.send(RouterInput::Capabilities { project_id, result });
        });
    }

    fn notify(&self, notice: ChangeNotice) {
        // No subscribers is fine
        let _ = self.changes.send(notice);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.router_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Reject operations that make no sense for the project's current state
fn check_allowed(project: &Project, kind: OperationKind) -> SyncResult<()> {
    let id = project.id();
    match kind {
        OperationKind::Restart(mode) => {
            if !project.is_enabled() {
                return Err(SyncError::InvalidState(format!("{} is disabled", id)));
            }
            if let Some(caps) = project.capabilities().filter(|c| !c.start_modes.is_empty()) {
                if !caps.supports_start_mode(mode) {
                    return Err(SyncError::InvalidState(format!(
                        "{} does not support start mode {}",
                        id, mode
                    )));
                }
            }
        }
        OperationKind::Enable if project.is_enabled() => {
            return Err(SyncError::InvalidState(format!("{} is already enabled", id)));
        }
        OperationKind::Disable if !project.is_enabled() => {
            return Err(SyncError::InvalidState(format!("{} is already disabled", id)));
        }
        _ => {}
    }
    Ok(())
}

/// Recompute every project's incoming links from all outgoing links.
/// Returns the IDs whose incoming links changed.
fn derive_incoming_links(projects: &mut [Project]) -> Vec<String> {
    let mut incoming: HashMap<String, Vec<IncomingLink>> = HashMap::new();
    for project in projects.iter() {
        for link in project.outgoing_links() {
            incoming
                .entry(link.project_id.clone())
                .or_default()
                .push(IncomingLink {
                    source_project_id: project.id().to_string(),
                    env_name: link.env_name.clone(),
                });
        }
    }

    let mut changed = Vec::new();
    for project in projects.iter_mut() {
        let links = incoming.remove(project.id()).unwrap_or_default();
        if project.set_incoming_links(links) {
            changed.push(project.id().to_string());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use projsync_core::ProjectLink;

    fn project(id: &str, links: &[(&str, &str)]) -> Project {
        let links = links
            .iter()
            .map(|(target, env)| ProjectLink {
                project_id: target.to_string(),
                env_name: env.to_string(),
                project_url: None,
            })
            .collect();
        Project::from_snapshot("c", &ProjectSnapshot::new(id).with_links(links))
            .unwrap()
            .0
    }

    #[test]
    fn incoming_links_are_derived() {
        let mut projects = vec![
            project("front", &[("back", "BACKEND_URL")]),
            project("back", &[]),
            project("admin", &[("back", "API")]),
        ];

        let changed = derive_incoming_links(&mut projects);
        assert_eq!(changed, vec!["back".to_string()]);
        assert_eq!(
            projects[1].incoming_links(),
            &[
                IncomingLink {
                    source_project_id: "front".into(),
                    env_name: "BACKEND_URL".into()
                },
                IncomingLink {
                    source_project_id: "admin".into(),
                    env_name: "API".into()
                },
            ]
        );

        // Nothing changes the second time
        assert!(derive_incoming_links(&mut projects).is_empty());
    }

    #[test]
    fn operations_checked_against_state() {
        let open = Project::from_snapshot(
            "c",
            &ProjectSnapshot::new("p").open().with_app_status("started"),
        )
        .unwrap()
        .0;
        let closed = Project::from_snapshot("c", &ProjectSnapshot::new("p").closed())
            .unwrap()
            .0;

        assert!(check_allowed(&open, OperationKind::Restart(StartMode::Run)).is_ok());
        assert!(check_allowed(&open, OperationKind::Disable).is_ok());
        assert!(check_allowed(&open, OperationKind::Enable).is_err());
        assert!(check_allowed(&closed, OperationKind::Restart(StartMode::Run)).is_err());
        assert!(check_allowed(&closed, OperationKind::Enable).is_ok());
        assert!(check_allowed(&closed, OperationKind::Delete).is_ok());
    }
}
