//! Types for the event stream

use thiserror::Error;

pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while streaming events
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP/connection error
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Failed to parse an SSE event
    #[error("Parse error: {0}")]
    Parse(String),

    /// Server refused the stream
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Stream was closed by the server
    #[error("Stream closed")]
    Closed,
}

impl StreamError {
    /// The server rejected our credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Server { status: 401 | 403, .. })
    }
}
