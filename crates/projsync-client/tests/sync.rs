//! Project mirror and event routing

mod common;

use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use projsync_client::testing::MockBackend;
use projsync_client::{ChangeNotice, DropReason, LogEventKind, Routing};
use projsync_core::{AppState, BuildState, IncomingLink, Ports, ProjectSnapshot};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn initial_listing_populates_mirror() {
    let backend = MockBackend::with_projects(vec![started("web"), stopped("db")]);
    let connection = connect(&backend, timeouts()).await;

    let projects = connection.list_projects();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].id(), "web");
    assert_eq!(projects[0].app_state(), AppState::Started);
    assert_eq!(projects[0].build_state(), BuildState::Succeeded);
    assert_eq!(projects[0].container_id(), Some("ctr-web"));
    assert_eq!(projects[1].app_state(), AppState::Stopped);
    assert_eq!(projects[1].connection_id(), "local");
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn duplicate_update_does_not_notify_twice() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;
    let mut notices = connection.subscribe();

    let update = json!({"projectID": "p1", "appStatus": "started", "buildStatus": "success"});

    let routed = route(&connection, event("projectStatusChanged", update.clone())).await;
    assert_eq!(routed, Routing::Delivered);
    assert_eq!(notices.try_recv(), Ok(ChangeNotice::Project("p1".into())));
    let after_first = connection.get_project("p1").unwrap();

    let routed = route(&connection, event("projectStatusChanged", update)).await;
    assert_eq!(routed, Routing::Delivered);
    assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(connection.get_project("p1").unwrap(), after_first);
}

#[tokio::test]
async fn debug_start_mode_upgrades_state() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;

    route(
        &connection,
        event(
            "projectStatusChanged",
            json!({"projectID": "p1", "appStatus": "started", "startMode": "debug"}),
        ),
    )
    .await;

    assert_eq!(connection.get_project("p1").unwrap().app_state(), AppState::Debugging);
}

#[tokio::test]
async fn closed_project_has_no_build_state() {
    let backend = MockBackend::with_projects(vec![started("p1")]);
    let connection = connect(&backend, timeouts()).await;

    route(
        &connection,
        event("projectClosed", json!({"projectID": "p1", "buildStatus": "inProgress"})),
    )
    .await;

    let project = connection.get_project("p1").unwrap();
    assert_eq!(project.app_state(), AppState::Disabled);
    assert_eq!(project.build_state(), BuildState::Unknown);
    assert_eq!(project.container_id(), None);
    assert!(project.capabilities().is_none());
}

#[tokio::test]
async fn invalid_ports_are_ignored() {
    let backend = MockBackend::with_projects(vec![started("p1").with_app_port(8080)]);
    let connection = connect(&backend, timeouts()).await;

    route(
        &connection,
        event(
            "projectChanged",
            json!({
                "projectID": "p1",
                "ports": {
                    "exposedPort": 70000,
                    "internalPort": 3000,
                    "exposedDebugPort": -1,
                    "internalDebugPort": "abc"
                }
            }),
        ),
    )
    .await;

    assert_eq!(
        connection.get_project("p1").unwrap().ports(),
        Ports {
            app: Some(8080),
            internal: Some(3000),
            debug: None,
            internal_debug: None,
        }
    );
}

#[tokio::test]
async fn unknown_project_triggers_one_resync_then_retry() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;
    assert_eq!(backend.list_calls(), 1);

    // Created on the server after our listing
    backend.push_project(stopped("p2"));
    let routed = route(
        &connection,
        event("projectStatusChanged", json!({"projectID": "p2", "appStatus": "starting"})),
    )
    .await;
    assert_eq!(routed, Routing::DeliveredAfterResync);
    assert_eq!(backend.list_calls(), 2);
    assert_eq!(connection.get_project("p2").unwrap().app_state(), AppState::Starting);

    // Never heard of, even after a resync
    let routed = route(
        &connection,
        event("projectStatusChanged", json!({"projectID": "ghost", "appStatus": "started"})),
    )
    .await;
    assert_eq!(routed, Routing::Dropped(DropReason::UnknownProject));
    assert_eq!(backend.list_calls(), 3);
    assert!(!connection.has_project("ghost"));
}

#[tokio::test]
async fn malformed_events_are_dropped() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;

    let missing_id = route(&connection, event("projectChanged", json!({"name": "x"}))).await;
    assert_eq!(missing_id, Routing::Dropped(DropReason::Protocol));

    let unknown_type = route(&connection, event("projectExploded", json!({"projectID": "p1"}))).await;
    assert_eq!(unknown_type, Routing::Dropped(DropReason::Protocol));

    let bad_shape = route(
        &connection,
        event("projectStatusChanged", json!({"projectID": "p1", "appStatus": 12})),
    )
    .await;
    assert_eq!(bad_shape, Routing::Dropped(DropReason::Protocol));

    // Nothing triggered a resync
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn resync_merges_listing() {
    let backend = MockBackend::with_projects(vec![stopped("a"), stopped("b")]);
    let connection = connect(&backend, timeouts()).await;
    let mut notices = connection.subscribe();

    backend.set_projects(vec![started("a"), stopped("c")]);
    connection.refresh_all().await.unwrap();

    let ids: Vec<String> = connection
        .list_projects()
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(connection.get_project("a").unwrap().app_state(), AppState::Started);
    assert_eq!(notices.try_recv(), Ok(ChangeNotice::Root));
}

#[tokio::test]
async fn concurrent_resyncs_are_coalesced() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;
    backend.set_list_delay(Duration::from_millis(50));

    let (a, b, c) = tokio::join!(
        connection.refresh_all(),
        connection.refresh_all(),
        connection.refresh_all()
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(backend.list_calls(), 2);

    // A later request starts a fresh resync
    connection.refresh_all().await.unwrap();
    assert_eq!(backend.list_calls(), 3);
}

#[tokio::test]
async fn queued_events_for_unknown_project_share_one_resync() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;
    backend.set_list_delay(Duration::from_millis(50));

    for _ in 0..5 {
        connection.submit(event(
            "projectStatusChanged",
            json!({"projectID": "ghost", "appStatus": "started"}),
        ));
    }
    // Queued behind the burst, so it marks the end of it
    connection.submit(event(
        "projectStatusChanged",
        json!({"projectID": "p1", "appStatus": "started"}),
    ));

    assert!(eventually(|| connection.get_project("p1").unwrap().app_state() == AppState::Started).await);
    assert_eq!(backend.list_calls(), 2);
    assert!(!connection.has_project("ghost"));

    // Once the burst is over a new unknown event resyncs again
    backend.push_project(stopped("ghost"));
    connection.submit(event(
        "projectStatusChanged",
        json!({"projectID": "ghost", "appStatus": "started"}),
    ));
    assert!(eventually(|| connection
        .get_project("ghost")
        .is_some_and(|p| p.app_state() == AppState::Started))
    .await);
    assert_eq!(backend.list_calls(), 3);
}

#[tokio::test]
async fn incoming_links_follow_outgoing_links() {
    let backend = MockBackend::with_projects(vec![stopped("front"), stopped("back")]);
    let connection = connect(&backend, timeouts()).await;
    let mut notices = connection.subscribe();

    route(
        &connection,
        event(
            "projectSettingsChanged",
            json!({
                "projectID": "front",
                "links": [{"projectID": "back", "envName": "BACKEND_URL", "projectURL": "http://back"}]
            }),
        ),
    )
    .await;

    assert_eq!(
        connection.get_project("back").unwrap().incoming_links(),
        &[IncomingLink {
            source_project_id: "front".into(),
            env_name: "BACKEND_URL".into(),
        }]
    );
    assert_eq!(notices.try_recv(), Ok(ChangeNotice::Project("front".into())));
    assert_eq!(notices.try_recv(), Ok(ChangeNotice::Project("back".into())));

    // Deleting the source drops the derived link
    route(&connection, event("projectDeletion", json!({"projectID": "front"}))).await;
    assert!(connection.get_project("back").unwrap().incoming_links().is_empty());
}

#[tokio::test]
async fn log_events_are_fanned_out() {
    let backend = MockBackend::with_projects(vec![started("p1")]);
    let connection = connect(&backend, timeouts()).await;
    let mut logs = connection.subscribe_logs();

    route(
        &connection,
        event(
            "log-update",
            json!({"projectID": "p1", "logName": "app.log", "logs": "listening on 3000\n", "reset": true}),
        ),
    )
    .await;

    let received = logs.try_recv().unwrap();
    assert_eq!(received.project_id, "p1");
    assert_eq!(
        received.kind,
        LogEventKind::Update {
            log_name: "app.log".into(),
            logs: "listening on 3000\n".into(),
            reset: true,
        }
    );
}

#[tokio::test]
async fn submitted_events_are_applied_in_order() {
    let backend = MockBackend::with_projects(vec![stopped("p1")]);
    let connection = connect(&backend, timeouts()).await;

    for status in ["starting", "started", "stopping", "stopped", "starting"] {
        connection.submit(event(
            "projectStatusChanged",
            json!({"projectID": "p1", "appStatus": status}),
        ));
    }
    connection.submit(event(
        "projectChanged",
        json!({"projectID": "p1", "name": "renamed"}),
    ));

    assert!(eventually(|| connection.get_project("p1").unwrap().name() == "renamed").await);
    assert_eq!(connection.get_project("p1").unwrap().app_state(), AppState::Starting);
}

#[tokio::test]
async fn reenabled_project_fetches_capabilities() {
    let backend = MockBackend::with_projects(vec![ProjectSnapshot::new("p1").with_name("p1").closed()]);
    let connection = connect(&backend, timeouts()).await;
    assert!(!connection.get_project("p1").unwrap().is_enabled());

    route(
        &connection,
        event("projectStatusChanged", json!({"projectID": "p1", "state": "open", "appStatus": "stopped"})),
    )
    .await;

    let project = connection.get_project("p1").unwrap();
    assert_eq!(project.app_state(), AppState::Stopped);
    assert!(eventually(|| connection
        .get_project("p1")
        .is_some_and(|p| p.capabilities().is_some()))
    .await);
}
