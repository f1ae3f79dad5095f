//! Common error types for the synchronization core

use thiserror::Error;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced synchronously to callers of connection and backend operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Project not known to the connection
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Connection not registered with the manager
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Another operation already occupies the slot
    #[error("Busy: {0}")]
    Busy(String),

    /// Connection is disconnected or not authorized
    #[error("Connection not usable: {0}")]
    NotUsable(String),

    /// Requested action does not make sense in the project's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Backend rejected the credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transport/communication error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with something we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend rejected the request
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Map an HTTP status returned by the backend onto an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => SyncError::Unauthorized(message),
            404 => SyncError::ProjectNotFound(message),
            409 => SyncError::Busy(message),
            408 | 504 => SyncError::Timeout,
            502 | 503 => SyncError::Transport(message),
            _ => SyncError::Rejected { status, message },
        }
    }

    /// Whether this error indicates the connection itself is unhealthy
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout)
    }
}
