//! Per-project registry of pending operations with deadlines

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use projsync_core::{AppState, SyncError, SyncResult};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::operation::{
    Confirmation, OperationFailure, OperationKind, OperationOutcome, PendingOperation,
};

struct Tracked {
    op: PendingOperation,
    completion: Option<oneshot::Sender<OperationOutcome>>,
    timer: Option<JoinHandle<()>>,
}

impl Tracked {
    /// Deliver the outcome exactly once and stop the deadline timer
    fn finish(mut self, outcome: OperationOutcome) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(tx) = self.completion.take() {
            // The caller may have stopped waiting
            let _ = tx.send(outcome);
        }
    }
}

/// Handle returned to whoever started an operation
#[derive(Debug)]
pub struct PendingHandle {
    operation_id: u64,
    project_id: String,
    kind: OperationKind,
    receiver: oneshot::Receiver<OperationOutcome>,
}

impl PendingHandle {
    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for the operation to resolve. Never waits past its deadline.
    pub async fn wait(self) -> OperationOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            Err(OperationFailure::Cancelled(
                "operation tracker shut down".to_string(),
            ))
        })
    }
}

/// At most one pending operation per project
#[derive(Default)]
pub struct PendingTracker {
    operations: Mutex<HashMap<String, Tracked>>,
    next_id: AtomicU64,
}

impl PendingTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new operation for a project.
    ///
    /// Fails with [`SyncError::Busy`] if the project already has one; the
    /// existing operation is left untouched. `current` is the project's app
    /// state right now, so a restart of an already stopped project starts
    /// one step in.
    pub fn begin(
        self: &Arc<Self>,
        project_id: &str,
        kind: OperationKind,
        current: AppState,
        timeout: Duration,
    ) -> SyncResult<PendingHandle> {
        let mut operations = self.operations.lock();
        if let Some(existing) = operations.get(project_id) {
            return Err(SyncError::Busy(format!(
                "{} already has a pending {}",
                project_id,
                existing.op.kind()
            )));
        }

        let operation_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut op = PendingOperation::new(operation_id, project_id, kind, timeout);
        op.observe_state(current);

        let (tx, rx) = oneshot::channel();
        let timer = self.spawn_deadline(project_id, operation_id, timeout);
        operations.insert(
            project_id.to_string(),
            Tracked {
                op,
                completion: Some(tx),
                timer: Some(timer),
            },
        );

        info!(project_id, operation = %kind, timeout_ms = timeout.as_millis() as u64, "Tracking operation");

        Ok(PendingHandle {
            operation_id,
            project_id: project_id.to_string(),
            kind,
            receiver: rx,
        })
    }

    fn spawn_deadline(
        self: &Arc<Self>,
        project_id: &str,
        operation_id: u64,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.expire(&project_id, operation_id);
            }
        })
    }

    /// Feed the project's new app state to its operation
    pub fn observe_state(&self, project_id: &str, app: AppState) {
        self.step(project_id, |op| op.observe_state(app));
    }

    /// Feed a confirmation event. Returns whether an operation accepted it.
    pub fn confirm(&self, project_id: &str, confirmation: &Confirmation) -> bool {
        let mut accepted = false;
        self.step(project_id, |op| {
            accepted = op.accepts(confirmation);
            op.confirm(confirmation)
        });
        accepted
    }

    /// Fail the project's operation unless it is of the given kind
    pub fn abort_unless(&self, project_id: &str, keep: OperationKind, reason: &str) {
        self.step(project_id, |op| {
            if op.kind() == keep {
                None
            } else {
                op.abort(reason)
            }
        });
    }

    /// Fail the project's operation
    pub fn abort(&self, project_id: &str, reason: &str) {
        self.step(project_id, |op| op.abort(reason));
    }

    /// Fail one specific operation, if it is still the project's current one
    pub fn abort_operation(&self, project_id: &str, operation_id: u64, reason: &str) {
        self.step(project_id, |op| {
            if op.id() == operation_id {
                op.abort(reason)
            } else {
                None
            }
        });
    }

    /// Cancel the project's operation. Returns whether one was cancelled.
    pub fn cancel(&self, project_id: &str, reason: &str) -> bool {
        let mut cancelled = false;
        self.step(project_id, |op| {
            let outcome = op.cancel(reason);
            cancelled = outcome.is_some();
            outcome
        });
        cancelled
    }

    /// Fail every operation, e.g. on connection loss
    pub fn abort_all(&self, reason: &str) {
        let drained: Vec<(String, Tracked)> = self.operations.lock().drain().collect();
        for (project_id, mut tracked) in drained {
            if let Some(outcome) = tracked.op.abort(reason) {
                debug!(project_id = %project_id, "Aborted pending operation");
                tracked.finish(outcome);
            }
        }
    }

    /// Copy of the project's current operation
    pub fn get(&self, project_id: &str) -> Option<PendingOperation> {
        self.operations.lock().get(project_id).map(|t| t.op.clone())
    }

    pub fn is_pending(&self, project_id: &str) -> bool {
        self.operations.lock().contains_key(project_id)
    }

    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, project_id: &str, operation_id: u64) {
        self.step(project_id, |op| {
            if op.id() == operation_id {
                op.time_out()
            } else {
                None
            }
        });
    }

    /// Run a transition; a terminal result removes the operation and resolves it
    fn step<F>(&self, project_id: &str, transition: F)
    where
        F: FnOnce(&mut PendingOperation) -> Option<OperationOutcome>,
    {
        let finished = {
            let mut operations = self.operations.lock();
            let Some(tracked) = operations.get_mut(project_id) else {
                return;
            };
            match transition(&mut tracked.op) {
                Some(outcome) => operations.remove(project_id).map(|t| (t, outcome)),
                None => None,
            }
        };

        if let Some((tracked, outcome)) = finished {
            tracked.finish(outcome);
        }
    }
}

impl Drop for PendingTracker {
    fn drop(&mut self) {
        for tracked in self.operations.get_mut().values_mut() {
            if let Some(timer) = tracked.timer.take() {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projsync_core::StartMode;

    const LONG: Duration = Duration::from_secs(180);

    fn restart() -> OperationKind {
        OperationKind::Restart(StartMode::Run)
    }

    #[tokio::test]
    async fn second_operation_is_rejected() {
        let tracker = PendingTracker::new();
        let _first = tracker
            .begin("p1", restart(), AppState::Started, LONG)
            .unwrap();
        tracker.observe_state("p1", AppState::Stopped);

        let second = tracker.begin("p1", OperationKind::Disable, AppState::Stopped, LONG);
        assert!(matches!(second, Err(SyncError::Busy(_))));

        let op = tracker.get("p1").unwrap();
        assert_eq!(op.kind(), restart());
        assert_eq!(op.sequence_index(), 1);

        // Other projects are independent
        assert!(tracker
            .begin("p2", restart(), AppState::Started, LONG)
            .is_ok());
    }

    #[tokio::test]
    async fn stopped_project_starts_one_step_in() {
        let tracker = PendingTracker::new();
        let handle = tracker
            .begin("p1", restart(), AppState::Stopped, LONG)
            .unwrap();
        assert_eq!(tracker.get("p1").unwrap().sequence_index(), 1);

        tracker.observe_state("p1", AppState::Starting);
        tracker.observe_state("p1", AppState::Started);
        assert!(tracker.confirm("p1", &Confirmation::Restart(Ok(()))));

        assert_eq!(handle.wait().await, Ok(()));
        assert!(!tracker.is_pending("p1"));
    }

    #[tokio::test]
    async fn wait_needs_state_and_confirmation() {
        let tracker = PendingTracker::new();
        let handle = tracker
            .begin("p1", restart(), AppState::Started, LONG)
            .unwrap();
        let mut wait = tokio_test::task::spawn(handle.wait());
        tokio_test::assert_pending!(wait.poll());

        tracker.observe_state("p1", AppState::Stopped);
        tracker.observe_state("p1", AppState::Starting);
        tracker.observe_state("p1", AppState::Started);
        tokio_test::assert_pending!(wait.poll());

        assert!(tracker.confirm("p1", &Confirmation::Restart(Ok(()))));
        tokio_test::assert_ready_eq!(wait.poll(), Ok(()));
    }

    #[tokio::test]
    async fn deadline_times_out() {
        let tracker = PendingTracker::new();
        let handle = tracker
            .begin("p1", restart(), AppState::Stopped, Duration::from_millis(50))
            .unwrap();

        let outcome = handle.wait().await;
        assert!(matches!(outcome, Err(OperationFailure::TimedOut(_))));
        assert!(!tracker.is_pending("p1"));

        // Late input for a resolved operation is a no-op
        tracker.observe_state("p1", AppState::Started);
        assert!(!tracker.confirm("p1", &Confirmation::Restart(Ok(()))));
    }

    #[tokio::test]
    async fn stale_timer_does_not_touch_newer_operation() {
        let tracker = PendingTracker::new();
        let first = tracker
            .begin("p1", OperationKind::Delete, AppState::Started, Duration::from_millis(30))
            .unwrap();
        tracker.confirm("p1", &Confirmation::Deleted);
        assert_eq!(first.wait().await, Ok(()));

        let second = tracker
            .begin("p1", restart(), AppState::Started, LONG)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(tracker.is_pending("p1"));
        assert!(tracker.cancel("p1", "test over"));
        assert!(second.wait().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn abort_all_fails_everything() {
        let tracker = PendingTracker::new();
        let a = tracker.begin("a", restart(), AppState::Started, LONG).unwrap();
        let b = tracker
            .begin("b", OperationKind::Disable, AppState::Started, LONG)
            .unwrap();

        tracker.abort_all("connection lost");
        assert!(tracker.is_empty());

        for handle in [a, b] {
            match handle.wait().await {
                Err(OperationFailure::Failed(reason)) => assert!(reason.contains("connection lost")),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn abort_unless_keeps_matching_kind() {
        let tracker = PendingTracker::new();
        let _handle = tracker
            .begin("p1", OperationKind::Disable, AppState::Started, LONG)
            .unwrap();
        tracker.abort_unless("p1", OperationKind::Disable, "project was disabled");
        assert!(tracker.is_pending("p1"));

        tracker.abort_unless("p1", restart(), "project was disabled");
        assert!(!tracker.is_pending("p1"));
    }
}
