//! PendingOperation state machine
//!
//! ```text
//! Created ──► InProgress ──┬──► Succeeded   (sequence observed + confirmed)
//!                          ├──► Failed      (failed confirmation, deleted, disabled, disconnected)
//!                          ├──► TimedOut    (deadline elapsed)
//!                          └──► Cancelled   (user cancelled)
//! ```
//!
//! Transitions are plain method calls on the value; every terminal state
//! ignores further input. Nothing in here knows about tasks or timers.

use std::time::Duration;

use projsync_core::{AppState, ControlCommand, StartMode};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The control action an operation tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Restart(StartMode),
    Enable,
    Disable,
    Delete,
}

impl OperationKind {
    /// App states the project has to pass through, in order
    pub fn expected_sequence(&self) -> Vec<AppState> {
        match self {
            OperationKind::Restart(mode) if mode.is_debug() => vec![
                AppState::Stopped,
                AppState::DebugStarting,
                AppState::Debugging,
            ],
            OperationKind::Restart(_) => {
                vec![AppState::Stopped, AppState::Starting, AppState::Started]
            }
            OperationKind::Disable => vec![AppState::Disabled],
            OperationKind::Enable | OperationKind::Delete => Vec::new(),
        }
    }

    /// Outbound command that starts this operation
    pub fn command(&self) -> ControlCommand {
        match self {
            OperationKind::Restart(mode) => ControlCommand::Restart(*mode),
            OperationKind::Enable => ControlCommand::Enable,
            OperationKind::Disable => ControlCommand::Disable,
            OperationKind::Delete => ControlCommand::Remove,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Restart(mode) => write!(f, "restart in {} mode", mode),
            OperationKind::Enable => f.write_str("enable"),
            OperationKind::Disable => f.write_str("disable"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// A dedicated completion event for a specific kind of operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Restart result; `Err` carries the failure reason
    Restart(Result<(), String>),
    /// Close result; `Err` carries the failure reason
    Closed(Result<(), String>),
    /// The project left the disabled state
    Enabled,
    /// The project was deleted
    Deleted,
}

/// Lifecycle state of a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Created | OperationState::InProgress)
    }
}

/// Why an operation did not succeed.
///
/// The variants are kept apart because callers treat them differently: a
/// user cancellation should not raise an error, a timeout may be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationFailure {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    TimedOut(String),

    #[error("{0}")]
    Cancelled(String),
}

impl OperationFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationFailure::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, OperationFailure::TimedOut(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            OperationFailure::Failed(r)
            | OperationFailure::TimedOut(r)
            | OperationFailure::Cancelled(r) => r,
        }
    }
}

/// Final result of a pending operation
pub type OperationOutcome = Result<(), OperationFailure>;

/// One in-flight control operation against one project
#[derive(Debug, Clone)]
pub struct PendingOperation {
    id: u64,
    project_id: String,
    kind: OperationKind,
    expected: Vec<AppState>,
    index: usize,
    started: Instant,
    deadline: Instant,
    confirmation_received: bool,
    state: OperationState,
    outcome: Option<OperationOutcome>,
}

impl PendingOperation {
    /// Create an operation. It moves to `InProgress` immediately.
    pub fn new(id: u64, project_id: impl Into<String>, kind: OperationKind, timeout: Duration) -> Self {
        let started = Instant::now();
        let mut op = Self {
            id,
            project_id: project_id.into(),
            kind,
            expected: kind.expected_sequence(),
            index: 0,
            started,
            deadline: started + timeout,
            confirmation_received: false,
            state: OperationState::Created,
            outcome: None,
        };
        op.state = OperationState::InProgress;
        debug!(
            project_id = %op.project_id,
            operation = %kind,
            expected = ?op.expected,
            "Pending operation started"
        );
        op
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn outcome(&self) -> Option<&OperationOutcome> {
        self.outcome.as_ref()
    }

    pub fn expected_sequence(&self) -> &[AppState] {
        &self.expected
    }

    /// Index of the next expected state
    pub fn sequence_index(&self) -> usize {
        self.index
    }

    pub fn confirmation_received(&self) -> bool {
        self.confirmation_received
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn sequence_complete(&self) -> bool {
        self.index >= self.expected.len()
    }

    /// Feed a new app state of the project.
    ///
    /// Advances when it is the next expected state. Anything else is ignored;
    /// intermediate states may be skipped by a fast backend.
    pub fn observe_state(&mut self, app: AppState) -> Option<OperationOutcome> {
        if self.is_terminal() || self.sequence_complete() {
            return None;
        }
        if self.expected[self.index] != app {
            return None;
        }

        self.index += 1;
        debug!(
            project_id = %self.project_id,
            state = %app,
            step = self.index,
            of = self.expected.len(),
            "Pending operation advanced"
        );

        if self.sequence_complete() && self.confirmation_received {
            return self.resolve(OperationState::Succeeded, Ok(()));
        }
        None
    }

    /// Whether a confirmation event belongs to this kind of operation
    pub fn accepts(&self, confirmation: &Confirmation) -> bool {
        matches!(
            (self.kind, confirmation),
            (OperationKind::Restart(_), Confirmation::Restart(_))
                | (OperationKind::Disable, Confirmation::Closed(_))
                | (OperationKind::Enable, Confirmation::Enabled)
                | (OperationKind::Delete, Confirmation::Deleted)
        )
    }

    /// Feed a confirmation event. Confirmations for other kinds are ignored.
    pub fn confirm(&mut self, confirmation: &Confirmation) -> Option<OperationOutcome> {
        if self.is_terminal() || !self.accepts(confirmation) {
            return None;
        }

        match confirmation {
            Confirmation::Restart(Err(reason)) | Confirmation::Closed(Err(reason)) => {
                let reason = format!("{} of {} failed: {}", self.kind, self.project_id, reason);
                self.resolve(OperationState::Failed, Err(OperationFailure::Failed(reason)))
            }
            _ => {
                self.confirmation_received = true;
                if self.sequence_complete() {
                    self.resolve(OperationState::Succeeded, Ok(()))
                } else {
                    debug!(
                        project_id = %self.project_id,
                        step = self.index,
                        of = self.expected.len(),
                        "Confirmation received, waiting for remaining states"
                    );
                    None
                }
            }
        }
    }

    /// The deadline elapsed
    pub fn time_out(&mut self) -> Option<OperationOutcome> {
        if self.is_terminal() {
            return None;
        }
        let waited = self.started.elapsed();
        let reason = if self.sequence_complete() {
            format!(
                "{} of {} timed out after {:.1}s waiting for confirmation",
                self.kind,
                self.project_id,
                waited.as_secs_f64()
            )
        } else {
            format!(
                "{} of {} timed out after {:.1}s waiting for state {}",
                self.kind,
                self.project_id,
                waited.as_secs_f64(),
                self.expected[self.index]
            )
        };
        self.resolve(OperationState::TimedOut, Err(OperationFailure::TimedOut(reason)))
    }

    /// Fail the operation because the world changed under it
    pub fn abort(&mut self, reason: impl Into<String>) -> Option<OperationOutcome> {
        if self.is_terminal() {
            return None;
        }
        let reason = format!("{} of {} failed: {}", self.kind, self.project_id, reason.into());
        self.resolve(OperationState::Failed, Err(OperationFailure::Failed(reason)))
    }

    /// Cancel the operation on request
    pub fn cancel(&mut self, reason: impl Into<String>) -> Option<OperationOutcome> {
        if self.is_terminal() {
            return None;
        }
        let reason = format!("{} of {} cancelled: {}", self.kind, self.project_id, reason.into());
        self.resolve(OperationState::Cancelled, Err(OperationFailure::Cancelled(reason)))
    }

    fn resolve(&mut self, state: OperationState, outcome: OperationOutcome) -> Option<OperationOutcome> {
        match &outcome {
            Ok(()) => info!(
                project_id = %self.project_id,
                operation = %self.kind,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Operation succeeded"
            ),
            Err(failure) => warn!(
                project_id = %self.project_id,
                operation = %self.kind,
                "Operation did not succeed: {}",
                failure
            ),
        }
        self.state = state;
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(180);

    fn restart() -> PendingOperation {
        PendingOperation::new(1, "p1", OperationKind::Restart(StartMode::Run), TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reason_reports_time_waited() {
        let mut op = restart();
        op.observe_state(AppState::Stopped);
        tokio::time::advance(TIMEOUT).await;

        match op.time_out() {
            Some(Err(OperationFailure::TimedOut(reason))) => assert_eq!(
                reason,
                "restart in run mode of p1 timed out after 180.0s waiting for state starting"
            ),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(op.state(), OperationState::TimedOut);
    }

    #[test]
    fn starts_in_progress() {
        let op = restart();
        assert_eq!(op.state(), OperationState::InProgress);
        assert_eq!(
            op.expected_sequence(),
            &[AppState::Stopped, AppState::Starting, AppState::Started]
        );
    }

    #[test]
    fn debug_restart_expects_debug_states() {
        let op = PendingOperation::new(1, "p1", OperationKind::Restart(StartMode::Debug), TIMEOUT);
        assert_eq!(
            op.expected_sequence(),
            &[AppState::Stopped, AppState::DebugStarting, AppState::Debugging]
        );
    }

    #[test]
    fn succeeds_when_sequence_then_confirmation() {
        let mut op = restart();
        assert_eq!(op.observe_state(AppState::Stopping), None);
        assert_eq!(op.observe_state(AppState::Stopped), None);
        assert_eq!(op.observe_state(AppState::Starting), None);
        assert_eq!(op.observe_state(AppState::Started), None);
        assert_eq!(op.state(), OperationState::InProgress);
        assert_eq!(op.confirm(&Confirmation::Restart(Ok(()))), Some(Ok(())));
        assert_eq!(op.state(), OperationState::Succeeded);
    }

    #[test]
    fn succeeds_when_confirmation_then_sequence() {
        let mut op = restart();
        assert_eq!(op.confirm(&Confirmation::Restart(Ok(()))), None);
        assert!(op.confirmation_received());
        op.observe_state(AppState::Stopped);
        op.observe_state(AppState::Starting);
        assert_eq!(op.observe_state(AppState::Started), Some(Ok(())));
    }

    #[test]
    fn out_of_order_states_are_ignored() {
        let mut op = restart();
        op.observe_state(AppState::Started);
        op.observe_state(AppState::Starting);
        assert_eq!(op.sequence_index(), 0);
        op.observe_state(AppState::Stopped);
        assert_eq!(op.sequence_index(), 1);
        assert_eq!(op.state(), OperationState::InProgress);
    }

    #[test]
    fn failed_confirmation_fails_immediately() {
        let mut op = restart();
        op.observe_state(AppState::Stopped);
        let outcome = op.confirm(&Confirmation::Restart(Err("image build failed".into())));
        match outcome {
            Some(Err(OperationFailure::Failed(reason))) => {
                assert!(reason.contains("image build failed"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(op.state(), OperationState::Failed);
    }

    #[test]
    fn confirmation_for_other_kind_is_ignored() {
        let mut op = restart();
        assert_eq!(op.confirm(&Confirmation::Closed(Ok(()))), None);
        assert!(!op.confirmation_received());
    }

    #[test]
    fn terminal_operations_ignore_input() {
        let mut op = restart();
        assert!(matches!(op.time_out(), Some(Err(OperationFailure::TimedOut(_)))));
        assert_eq!(op.observe_state(AppState::Stopped), None);
        assert_eq!(op.confirm(&Confirmation::Restart(Ok(()))), None);
        assert_eq!(op.abort("gone"), None);
        assert_eq!(op.cancel("user"), None);
        assert_eq!(op.state(), OperationState::TimedOut);
    }

    #[test]
    fn timeout_reason_names_the_missing_state() {
        let mut op = restart();
        op.observe_state(AppState::Stopped);
        match op.time_out() {
            Some(Err(OperationFailure::TimedOut(reason))) => {
                assert!(reason.contains("starting"), "{}", reason)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn cancel_is_distinct_from_failure() {
        let mut op = restart();
        let outcome = op.cancel("requested by user").unwrap();
        let failure = outcome.unwrap_err();
        assert!(failure.is_cancelled());
        assert!(!failure.is_timeout());
        assert_eq!(op.state(), OperationState::Cancelled);
    }

    #[test]
    fn disable_needs_disabled_state_and_close_confirmation() {
        let mut op = PendingOperation::new(2, "p1", OperationKind::Disable, TIMEOUT);
        assert_eq!(op.observe_state(AppState::Disabled), None);
        assert_eq!(op.confirm(&Confirmation::Closed(Ok(()))), Some(Ok(())));
    }

    #[test]
    fn delete_and_enable_need_only_confirmation() {
        let mut delete = PendingOperation::new(3, "p1", OperationKind::Delete, TIMEOUT);
        assert_eq!(delete.confirm(&Confirmation::Deleted), Some(Ok(())));

        let mut enable = PendingOperation::new(4, "p1", OperationKind::Enable, TIMEOUT);
        assert_eq!(enable.confirm(&Confirmation::Enabled), Some(Ok(())));
    }
}
