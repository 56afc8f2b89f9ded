//! Client side of remote, multi-step "runs".
//!
//! [`ExecutionTracker`] submits work through a [`RunBackend`], tracks the resulting runs
//! locally, and polls them until they reach a terminal [`RunStatus`]. Tracking survives a
//! process restart through [`ExecutionTracker::resume`], which rebuilds state from the
//! executor's list of active runs.

pub mod client;
pub mod tracker;
pub mod types;

use std::time::Duration;

pub use client::{ExecutorError, HttpRunBackend, RunBackend};
pub use tracker::{ExecutionTracker, UpdateCallback};
pub use types::{
    ExecuteOutcome, ExecuteRequest, ExecuteResponse, RunHandle, RunSnapshot, RunStatus,
    StepDetails, TrackedRun,
};

use crate::config::ExecutorConfig;

/// A tracker talking HTTP to the configured executor.
pub fn http_tracker(config: &ExecutorConfig) -> Result<ExecutionTracker<HttpRunBackend>, ExecutorError> {
    let backend = HttpRunBackend::new(config)?;
    Ok(ExecutionTracker::new(
        backend,
        Duration::from_millis(config.poll_interval_ms.max(1)),
    ))
}
