//! projsync Client Library
//!
//! Keeps a local mirror of the projects managed by one or more remote control
//! planes, applies their push events in order, and tracks long-running
//! operations (restart, enable, disable, delete) until the server confirms them.
//!
//! # Example
//!
//! ```rust,no_run
//! use projsync_client::{ConnectionConfig, ConnectionManager, ClientConfig};
//! use projsync_core::StartMode;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConnectionManager::from_config(&ClientConfig::default());
//!     let connection = manager
//!         .connect_http(&ConnectionConfig::new("local", "http://localhost:9090"))
//!         .await?;
//!
//!     for project in connection.list_projects() {
//!         println!("{} {}", project.name(), project.state());
//!     }
//!
//!     // Resolves once the server reports the project started again
//!     let handle = connection.restart("a1b2c3", StartMode::Run).await?;
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a scripted in-memory backend:
//!
//! ```rust,ignore
//! use projsync_client::testing::MockBackend;
//!
//! let backend = MockBackend::with_projects(vec![ProjectSnapshot::new("p1")]);
//! let connection = manager.connect_with("local", url, backend.clone()).await?;
//! assert_eq!(backend.list_calls(), 1);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod pending;
pub mod project;
pub mod router;
pub mod streaming;
pub mod testing;

pub use config::{ClientConfig, ConfigError, ConnectionConfig, InstallerConfig, StreamConfig, TimeoutsConfig};
pub use connection::{ChangeNotice, Connection, LinkStatus, LogEvent, LogEventKind};
pub use error::{ClientError, Result};
pub use http::HttpBackend;
pub use lifecycle::{Installer, InstallerOutput, LifecycleCommand, LifecycleError, OperationLifecycleManager};
pub use manager::ConnectionManager;
pub use pending::{
    Confirmation, OperationFailure, OperationKind, OperationOutcome, OperationState, PendingHandle,
    PendingOperation, PendingTracker,
};
pub use project::{EnablementChange, Project, UpdateOutcome};
pub use router::{DropReason, EventRouter, Routing};
pub use streaming::{spawn_event_pump, EventStream, SseParser, StreamError};
