//! SSE (Server-Sent Events) parser
//!
//! Parses the SSE wire format into raw project events. The SSE `event:`
//! field names the event type and `data:` carries the JSON payload. Events
//! without a name must carry a `{"type": ..., "payload": ...}` envelope.

use bytes::Bytes;
use projsync_core::RawEvent;
use serde_json::Value;
use tracing::trace;

use super::types::{StreamError, StreamResult};

/// SSE parser state
#[derive(Debug, Default)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Current event data being accumulated
    data_buffer: String,
    /// Current event type (if any)
    event_type: Option<String>,
    /// Last event ID (if any)
    last_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// ID of the last event seen, for resuming after a reconnect
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed bytes into the parser and extract any complete events
    pub fn feed(&mut self, bytes: Bytes) -> Vec<StreamResult<RawEvent>> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(&bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &[u8]) -> Option<StreamResult<RawEvent>> {
        // Empty line ends the event
        if line.is_empty() {
            return self.dispatch_event();
        }

        if line.starts_with(b":") {
            trace!("SSE keepalive/comment");
            return None;
        }

        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                return Some(Err(StreamError::Parse("Invalid UTF-8 in SSE line".into())));
            }
        };

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if !self.data_buffer.is_empty() {
                    self.data_buffer.push('\n');
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => trace!("SSE retry: {}", value),
            _ => trace!("SSE unknown field: {}", field),
        }

        None
    }

    fn dispatch_event(&mut self) -> Option<StreamResult<RawEvent>> {
        let event_type = self.event_type.take();
        if self.data_buffer.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_buffer);

        let payload: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                let preview: String = data.chars().take(100).collect();
                return Some(Err(StreamError::Parse(format!(
                    "Failed to parse event JSON: {} (data: {})",
                    e, preview
                ))));
            }
        };

        match event_type.filter(|t| !t.is_empty() && t != "message") {
            Some(event_type) => Some(Ok(RawEvent::new(event_type, payload))),
            None => Some(
                serde_json::from_value::<RawEvent>(payload)
                    .map_err(|e| StreamError::Parse(format!("Unnamed event without envelope: {}", e))),
            ),
        }
    }
}
