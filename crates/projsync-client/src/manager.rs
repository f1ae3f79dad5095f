//! ConnectionManager - the application context
//!
//! Owns every registered [`Connection`] and the single
//! [`OperationLifecycleManager`]. Construct one and pass it to whatever needs
//! it; there is no process-wide instance.

use std::sync::Arc;

use parking_lot::RwLock;
use projsync_core::{ControlBackend, SyncError, SyncResult};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::config::{ClientConfig, ConnectionConfig, StreamConfig, TimeoutsConfig};
use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::http::HttpBackend;
use crate::lifecycle::OperationLifecycleManager;
use crate::project::Project;
use crate::streaming::spawn_event_pump;

struct Managed {
    connection: Arc<Connection>,
    pump: Option<JoinHandle<()>>,
}

impl Managed {
    fn shutdown(self) {
        if let Some(pump) = self.pump {
            pump.abort();
        }
        self.connection.dispose();
    }
}

pub struct ConnectionManager {
    timeouts: TimeoutsConfig,
    stream: StreamConfig,
    connections: RwLock<Vec<Managed>>,
    lifecycle: OperationLifecycleManager,
}

impl ConnectionManager {
    pub fn new(timeouts: TimeoutsConfig, stream: StreamConfig) -> Self {
        Self {
            timeouts,
            stream,
            connections: RwLock::new(Vec::new()),
            lifecycle: OperationLifecycleManager::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.timeouts.clone(), config.stream.clone())
    }

    pub fn lifecycle(&self) -> &OperationLifecycleManager {
        &self.lifecycle
    }

    /// Register a connection over an arbitrary backend.
    ///
    /// The initial listing is the handshake: the connection is only
    /// registered if it succeeds.
    pub async fn connect_with(
        &self,
        id: &str,
        endpoint: Url,
        backend: Arc<dyn ControlBackend>,
    ) -> Result<Arc<Connection>> {
        self.register(id, endpoint, backend, None).await
    }

    /// Register an HTTP connection and start streaming its events
    pub async fn connect_http(&self, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        let backend = HttpBackend::with_config(&config.endpoint, &self.timeouts, config.token.as_deref())?;
        let events_url = backend.events_url(&config.events_path)?;
        let stream_client = backend.stream_client();
        let endpoint = backend.base_url().clone();

        let stream = self.stream.clone();
        self.register(
            &config.id,
            endpoint,
            Arc::new(backend),
            Some(Box::new(move |connection: &Arc<Connection>| {
                spawn_event_pump(Arc::downgrade(connection), stream_client, events_url, stream)
            })),
        )
        .await
    }

    async fn register(
        &self,
        id: &str,
        endpoint: Url,
        backend: Arc<dyn ControlBackend>,
        start_pump: Option<Box<dyn FnOnce(&Arc<Connection>) -> JoinHandle<()> + Send>>,
    ) -> Result<Arc<Connection>> {
        if self.contains(id) {
            return Err(ClientError::DuplicateConnection(id.to_string()));
        }

        let connection = Connection::new(id, endpoint, backend, self.timeouts.clone());
        if let Err(e) = connection.refresh_all().await {
            warn!(connection_id = %id, "Initial handshake failed: {}", e);
            connection.dispose();
            return Err(e.into());
        }

        let mut connections = self.connections.write();
        if connections.iter().any(|m| m.connection.id() == id) {
            connection.dispose();
            return Err(ClientError::DuplicateConnection(id.to_string()));
        }

        let pump = start_pump.map(|start| start(&connection));
        connections.push(Managed {
            connection: connection.clone(),
            pump,
        });

        info!(
            connection_id = %id,
            projects = connection.list_projects().len(),
            "Connection registered"
        );
        Ok(connection)
    }

    fn contains(&self, id: &str) -> bool {
        self.connections
            .read()
            .iter()
            .any(|m| m.connection.id() == id)
    }

    pub fn get(&self, id: &str) -> SyncResult<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|m| m.connection.id() == id)
            .map(|m| m.connection.clone())
            .ok_or_else(|| SyncError::ConnectionNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .map(|m| m.connection.clone())
            .collect()
    }

    /// Find a project on any connection
    pub fn find_project(&self, project_id: &str) -> Option<(Arc<Connection>, Project)> {
        self.list().into_iter().find_map(|connection| {
            connection
                .get_project(project_id)
                .map(|project| (connection, project))
        })
    }

    /// Unregister a connection, failing its pending operations first
    pub fn remove(&self, id: &str) -> SyncResult<()> {
        let managed = {
            let mut connections = self.connections.write();
            let pos = connections
                .iter()
                .position(|m| m.connection.id() == id)
                .ok_or_else(|| SyncError::ConnectionNotFound(id.to_string()))?;
            connections.remove(pos)
        };
        info!(connection_id = %id, "Removing connection");
        managed.shutdown();
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for managed in self.connections.get_mut().drain(..) {
            managed.shutdown();
        }
    }
}
