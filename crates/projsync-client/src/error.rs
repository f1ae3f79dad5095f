//! Error types for setting up clients and connections

use projsync_core::SyncError;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors building backends or registering connections
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid auth token: {0}")]
    InvalidToken(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection ID already registered
    #[error("Connection already registered: {0}")]
    DuplicateConnection(String),

    /// Initial handshake with the backend failed
    #[error("Connection failed: {0}")]
    Sync(#[from] SyncError),
}
