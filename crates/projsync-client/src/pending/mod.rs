//! Tracking of in-flight control operations
//!
//! A control request (restart, enable, disable, delete) is acknowledged by the
//! backend long before it has actually happened. [`PendingOperation`] is the
//! state machine that correlates the request with the project states and the
//! dedicated confirmation event that follow; [`PendingTracker`] owns one of
//! those per project, their deadlines and the channels callers await.

mod operation;
mod tracker;

pub use operation::{
    Confirmation, OperationFailure, OperationKind, OperationOutcome, OperationState,
    PendingOperation,
};
pub use tracker::{PendingHandle, PendingTracker};
