//! External lifecycle operations
//!
//! Installing, starting or stopping the control plane itself runs an external
//! installer process. At most one such operation may run at a time; a second
//! request is rejected rather than queued.
//!
//! # Slot lifecycle
//!
//! ```text
//!   idle ──run()──► occupied ──┬── operation finishes ──► idle
//!                              ├── cancel() (cancellable only) ──► idle
//!                              └── caller dropped / panicked ──► idle
//! ```

use std::future::Future;
use std::process::Stdio;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::InstallerConfig;

/// An installer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    Install,
    Start,
    Stop,
    Remove,
    Upgrade,
}

impl LifecycleCommand {
    pub const ALL: [LifecycleCommand; 5] = [
        LifecycleCommand::Install,
        LifecycleCommand::Start,
        LifecycleCommand::Stop,
        LifecycleCommand::Remove,
        LifecycleCommand::Upgrade,
    ];

    /// Long-running commands the user may abort. Stop and remove must finish.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            LifecycleCommand::Install | LifecycleCommand::Start | LifecycleCommand::Upgrade
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleCommand::Install => "install",
            LifecycleCommand::Start => "start",
            LifecycleCommand::Stop => "stop",
            LifecycleCommand::Remove => "remove",
            LifecycleCommand::Upgrade => "upgrade",
        }
    }
}

impl std::fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown lifecycle command: {}", s))
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another operation holds the slot
    #[error("Cannot {requested}: {running} is already running")]
    Busy {
        running: LifecycleCommand,
        requested: LifecycleCommand,
    },

    /// Cancelled on user request. Not an error worth showing.
    #[error("{0} was cancelled")]
    Cancelled(LifecycleCommand),

    #[error("{0} cannot be cancelled")]
    NotCancellable(LifecycleCommand),

    #[error("No lifecycle operation is running")]
    NothingRunning,

    #[error("{command} failed: {reason}")]
    Failed {
        command: LifecycleCommand,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled(_))
    }
}

struct Running {
    command: LifecycleCommand,
    cancel: Option<oneshot::Sender<()>>,
}

/// The single slot for external lifecycle operations
#[derive(Default)]
pub struct OperationLifecycleManager {
    slot: Mutex<Option<Running>>,
}

/// Frees the slot however `run` exits
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<Running>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

impl OperationLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command currently holding the slot
    pub fn running(&self) -> Option<LifecycleCommand> {
        self.slot.lock().as_ref().map(|r| r.command)
    }

    /// Occupy the slot and run `operation`.
    ///
    /// Fails immediately with [`LifecycleError::Busy`] if the slot is taken.
    /// On cancellation the operation future is dropped (killing any child
    /// spawned with `kill_on_drop`) and [`LifecycleError::Cancelled`] is returned.
    pub async fn run<F, Fut, T>(&self, command: LifecycleCommand, operation: F) -> Result<T, LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LifecycleError>>,
    {
        let mut cancel_rx = {
            let mut slot = self.slot.lock();
            if let Some(running) = slot.as_ref() {
                return Err(LifecycleError::Busy {
                    running: running.command,
                    requested: command,
                });
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(Running {
                command,
                cancel: Some(tx),
            });
            rx
        };
        let _guard = SlotGuard { slot: &self.slot };

        info!(command = %command, "Lifecycle operation started");

        let result = tokio::select! {
            result = operation() => result,
            Ok(()) = &mut cancel_rx => Err(LifecycleError::Cancelled(command)),
        };

        match &result {
            Ok(_) => info!(command = %command, "Lifecycle operation finished"),
            Err(LifecycleError::Cancelled(_)) => info!(command = %command, "Lifecycle operation cancelled"),
            Err(e) => warn!(command = %command, "Lifecycle operation failed: {}", e),
        }
        result
    }

    /// Request cancellation of the running operation
    pub fn cancel(&self) -> Result<LifecycleCommand, LifecycleError> {
        let mut slot = self.slot.lock();
        let running = slot.as_mut().ok_or(LifecycleError::NothingRunning)?;
        if !running.command.is_cancellable() {
            return Err(LifecycleError::NotCancellable(running.command));
        }
        if let Some(cancel) = running.cancel.take() {
            debug!(command = %running.command, "Cancelling lifecycle operation");
            let _ = cancel.send(());
        }
        Ok(running.command)
    }
}

/// Output of a finished installer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerOutput {
    pub command: LifecycleCommand,
    pub stdout: String,
}

/// Runs the external installer executable
#[derive(Debug, Clone)]
pub struct Installer {
    executable: String,
    args: Vec<String>,
}

impl Installer {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            args: config.args.clone(),
        }
    }

    /// Full argument list for a command
    pub fn command_line(&self, command: LifecycleCommand) -> Vec<String> {
        let mut line = self.args.clone();
        line.push(command.as_str().to_string());
        line
    }

    /// Run `command` through `manager`'s slot
    pub async fn run(
        &self,
        manager: &OperationLifecycleManager,
        command: LifecycleCommand,
    ) -> Result<InstallerOutput, LifecycleError> {
        manager.run(command, || self.execute(command)).await
    }

    async fn execute(&self, command: LifecycleCommand) -> Result<InstallerOutput, LifecycleError> {
        debug!(executable = %self.executable, args = ?self.command_line(command), "Spawning installer");

        let output = Command::new(&self.executable)
            .args(self.command_line(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(InstallerOutput {
                command,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("installer exited with {}", output.status)
            } else {
                stderr
            };
            Err(LifecycleError::Failed { command, reason })
        }
    }
}
