//! Test utilities for projsync-client
//!
//! [`MockBackend`] is a scripted, in-memory [`ControlBackend`]: tests set the
//! listing it returns, inspect the commands it received and inject failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use projsync_core::{
    ControlBackend, ControlCommand, ProjectCapabilities, ProjectSnapshot, StartMode, SyncError,
    SyncResult,
};

/// In-memory control backend
#[derive(Default)]
pub struct MockBackend {
    projects: Mutex<Vec<ProjectSnapshot>>,
    commands: Mutex<Vec<(String, ControlCommand)>>,
    capabilities: Mutex<HashMap<String, ProjectCapabilities>>,
    list_calls: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
    list_error: Mutex<Option<SyncError>>,
    command_error: Mutex<Option<SyncError>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Backend whose listing starts out with `projects`
    pub fn with_projects(projects: Vec<ProjectSnapshot>) -> Arc<Self> {
        let backend = Self::new();
        backend.set_projects(projects);
        backend
    }

    /// Replace the listing
    pub fn set_projects(&self, projects: Vec<ProjectSnapshot>) {
        *self.projects.lock() = projects;
    }

    /// Add a project to the listing (server-side creation)
    pub fn push_project(&self, snapshot: ProjectSnapshot) {
        self.projects.lock().push(snapshot);
    }

    /// Drop a project from the listing (server-side deletion)
    pub fn remove_project(&self, project_id: &str) {
        self.projects
            .lock()
            .retain(|p| p.project_id.as_deref() != Some(project_id));
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<(String, ControlCommand)> {
        self.commands.lock().clone()
    }

    /// How many times the listing was fetched
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make every listing take this long
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = Some(delay);
    }

    /// Make listings fail (or succeed again with `None`)
    pub fn fail_list(&self, error: Option<SyncError>) {
        *self.list_error.lock() = error;
    }

    /// Make commands fail (or succeed again with `None`)
    pub fn fail_commands(&self, error: Option<SyncError>) {
        *self.command_error.lock() = error;
    }

    /// Capabilities reported for one project
    pub fn set_capabilities(&self, project_id: &str, capabilities: ProjectCapabilities) {
        self.capabilities
            .lock()
            .insert(project_id.to_string(), capabilities);
    }

    fn record(&self, project_id: &str, command: ControlCommand) -> SyncResult<()> {
        if let Some(error) = self.command_error.lock().clone() {
            return Err(error);
        }
        self.commands.lock().push((project_id.to_string(), command));
        Ok(())
    }
}

/// What a freshly enabled project advertises unless told otherwise
pub fn full_capabilities() -> ProjectCapabilities {
    ProjectCapabilities {
        start_modes: vec![StartMode::Run, StartMode::Debug, StartMode::DebugNoInit],
        control_commands: vec!["restart".to_string()],
    }
}

#[async_trait]
impl ControlBackend for MockBackend {
    async fn restart(&self, project_id: &str, mode: StartMode) -> SyncResult<()> {
        self.record(project_id, ControlCommand::Restart(mode))
    }

    async fn remove(&self, project_id: &str) -> SyncResult<()> {
        self.record(project_id, ControlCommand::Remove)
    }

    async fn set_enabled(&self, project_id: &str, enabled: bool) -> SyncResult<()> {
        let command = if enabled {
            ControlCommand::Enable
        } else {
            ControlCommand::Disable
        };
        self.record(project_id, command)
    }

    async fn list_projects(&self) -> SyncResult<Vec<ProjectSnapshot>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.list_error.lock().clone() {
            return Err(error);
        }
        Ok(self.projects.lock().clone())
    }

    async fn get_capabilities(&self, project_id: &str) -> SyncResult<ProjectCapabilities> {
        Ok(self
            .capabilities
            .lock()
            .get(project_id)
            .cloned()
            .unwrap_or_else(full_capabilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_commands_and_counts_listings() {
        let backend = MockBackend::with_projects(vec![ProjectSnapshot::new("p1")]);

        backend.send("p1", ControlCommand::Disable).await.unwrap();
        backend.restart("p1", StartMode::Debug).await.unwrap();
        assert_eq!(
            backend.commands(),
            vec![
                ("p1".to_string(), ControlCommand::Disable),
                ("p1".to_string(), ControlCommand::Restart(StartMode::Debug)),
            ]
        );

        assert_eq!(backend.list_projects().await.unwrap().len(), 1);
        backend.remove_project("p1");
        assert!(backend.list_projects().await.unwrap().is_empty());
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn injected_failures() {
        let backend = MockBackend::new();
        backend.fail_commands(Some(SyncError::Unauthorized("expired".into())));

        let result = backend.remove("p1").await;
        assert_eq!(result, Err(SyncError::Unauthorized("expired".into())));
        assert!(backend.commands().is_empty());

        backend.fail_list(Some(SyncError::Timeout));
        assert_eq!(backend.list_projects().await, Err(SyncError::Timeout));
    }
}
