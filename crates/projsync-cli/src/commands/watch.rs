//! Watch command - follow project changes as the server pushes them

use anyhow::Result;
use projsync_client::{ChangeNotice, Connection, LogEvent, LogEventKind};
use tokio::sync::broadcast::error::RecvError;

use crate::output::{OutputContext, ProjectRow};

/// Print every change until Ctrl+C. `project` narrows output to one project.
pub async fn watch(
    connection: &Connection,
    project: Option<&str>,
    logs: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let mut changes = connection.subscribe();
    let mut log_events = connection.subscribe_logs();
    let wanted = |id: &str| project.map_or(true, |p| p == id);

    ctx.info(&format!(
        "Watching {} ({} projects). Press Ctrl+C to stop",
        connection.endpoint(),
        connection.list_projects().len()
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            notice = changes.recv() => match notice {
                Ok(ChangeNotice::Project(id)) if wanted(&id) => {
                    if let Some(p) = connection.get_project(&id) {
                        ctx.print_one(&ProjectRow::from(&p));
                    }
                }
                Ok(ChangeNotice::Project(_)) => {}
                Ok(ChangeNotice::Root) => {
                    let status = connection.status();
                    if !status.connected {
                        ctx.warn("Connection lost, reconnecting...");
                    } else if !status.authorized {
                        ctx.warn("Not authorized");
                    } else {
                        ctx.info(&format!("Project list refreshed ({} projects)", connection.list_projects().len()));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    ctx.warn(&format!("Skipped {} changes", missed));
                }
                Err(RecvError::Closed) => break,
            },

            event = log_events.recv(), if logs => match event {
                Ok(event) if wanted(&event.project_id) => print_log(&event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => ctx.warn(&format!("Skipped {} log events", missed)),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn print_log(event: &LogEvent) {
    match &event.kind {
        LogEventKind::Update { log_name, logs, .. } => {
            for line in logs.lines() {
                println!("[{}/{}] {}", event.project_id, log_name, line);
            }
        }
        LogEventKind::ListChanged(list) => {
            println!("[{}] logs: {}", event.project_id, list.names().collect::<Vec<_>>().join(", "));
        }
    }
}
