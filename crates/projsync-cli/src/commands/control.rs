//! Restart, enable, disable and remove - wait for the server to confirm

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use projsync_client::{Connection, OperationKind};

use crate::output::OutputContext;

/// Send a control request and wait until the server confirms it.
///
/// Ctrl+C cancels the wait. The server may still finish the request.
pub async fn control(
    connection: &Connection,
    project_id: &str,
    kind: OperationKind,
    ctx: &OutputContext,
) -> Result<()> {
    let handle = match kind {
        OperationKind::Restart(mode) => connection.restart(project_id, mode).await,
        OperationKind::Enable => connection.enable(project_id).await,
        OperationKind::Disable => connection.disable(project_id).await,
        OperationKind::Delete => connection.remove(project_id).await,
    }
    .with_context(|| format!("Cannot {} {}", kind, project_id))?;

    let spinner = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
    spinner.set_message(format!("{}: waiting for {}", project_id, kind));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = tokio::signal::ctrl_c() => {
                connection.cancel_operation(project_id);
            }
        }
    };
    spinner.finish_and_clear();

    match outcome {
        Ok(()) => {
            ctx.success(&format!("{}: {} confirmed", project_id, kind));
            Ok(())
        }
        Err(failure) if failure.is_cancelled() => {
            ctx.warn(failure.reason());
            Ok(())
        }
        Err(failure) => Err(anyhow!(failure)),
    }
}
