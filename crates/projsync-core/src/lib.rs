//! projsync-core - Core types for the project synchronization client
//!
//! This crate provides the vocabulary shared by every layer of the client:
//! project state machines, partial snapshots as pushed by the server, the
//! tagged event union, and the `ControlBackend` trait that outbound commands
//! go through.

pub mod backend;
pub mod error;
pub mod events;
pub mod models;

pub use backend::{ControlBackend, ControlCommand};
pub use error::{SyncError, SyncResult};
pub use events::{ProjectEvent, ProtocolError, RawEvent, RestartOutcome};
pub use models::*;
