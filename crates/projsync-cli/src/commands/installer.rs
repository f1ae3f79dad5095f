//! Installer command - install, start, stop, remove or upgrade the control plane

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use projsync_client::{Installer, InstallerConfig, LifecycleCommand, OperationLifecycleManager};

use crate::output::OutputContext;

pub async fn installer(
    lifecycle: &OperationLifecycleManager,
    config: Option<&InstallerConfig>,
    command: LifecycleCommand,
    ctx: &OutputContext,
) -> Result<()> {
    let config = config.context("No installer configured (set `installer` in the client config)")?;
    let installer = Installer::new(config);

    let spinner = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Running installer {}", command));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let run = installer.run(lifecycle, command);
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = lifecycle.cancel() {
                    spinner.println(e.to_string());
                }
            }
        }
    };
    spinner.finish_and_clear();

    match result {
        Ok(output) => {
            let stdout = output.stdout.trim();
            if !stdout.is_empty() {
                ctx.info(stdout);
            }
            ctx.success(&format!("Installer {} finished", command));
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            ctx.warn(&e.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
