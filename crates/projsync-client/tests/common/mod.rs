//! Shared fixtures for projsync-client integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use projsync_client::testing::{full_capabilities, MockBackend};
use projsync_client::{Connection, EventRouter, Routing, TimeoutsConfig};
use projsync_core::{ProjectSnapshot, RawEvent};
use serde_json::Value;
use url::Url;

/// An open, stopped project that already advertises its capabilities
pub fn stopped(id: &str) -> ProjectSnapshot {
    ProjectSnapshot::new(id)
        .with_name(id)
        .open()
        .with_app_status("stopped")
        .with_build_status("success")
        .with_capabilities(full_capabilities())
}

/// An open, running project
pub fn started(id: &str) -> ProjectSnapshot {
    stopped(id).with_app_status("started").with_container_id(format!("ctr-{}", id))
}

pub fn timeouts() -> TimeoutsConfig {
    TimeoutsConfig::default()
}

/// Timeouts short enough to expire inside a test
pub fn short_timeouts(ms: u64) -> TimeoutsConfig {
    TimeoutsConfig {
        restart_ms: ms,
        toggle_ms: ms,
        delete_ms: ms,
        ..TimeoutsConfig::default()
    }
}

pub async fn connect(backend: &Arc<MockBackend>, timeouts: TimeoutsConfig) -> Arc<Connection> {
    let connection = Connection::new(
        "local",
        Url::parse("http://localhost:9090").unwrap(),
        backend.clone(),
        timeouts,
    );
    connection.refresh_all().await.unwrap();
    connection
}

pub fn event(event_type: &str, payload: Value) -> RawEvent {
    RawEvent::new(event_type, payload)
}

/// Route an event inline, bypassing the connection's queue
pub async fn route(connection: &Arc<Connection>, event: RawEvent) -> Routing {
    EventRouter::new(Arc::downgrade(connection))
        .handle_event(event)
        .await
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
