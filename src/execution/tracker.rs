//! Pull-based tracking of remote runs.
//!
//! Each polled run owns one tokio task and a gate. The task holds the gate while it merges
//! a snapshot and runs the update callback; [`ExecutionTracker::stop_run`] closes the gate
//! before aborting the task, so once `stop_run` returns no further callback fires for that
//! run. Callbacks must not call `stop_run` on their own run.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::{ExecutorError, RunBackend};
use super::types::{
    ExecuteOutcome, ExecuteRequest, ExecuteResponse, RunHandle, RunSnapshot, RunStatus,
    StepDetails, TrackedRun,
};

/// Invoked with the merged run after every successful poll.
pub type UpdateCallback = Arc<dyn Fn(&TrackedRun) + Send + Sync>;

type RunMap = Arc<Mutex<HashMap<String, TrackedRun>>>;
type PollerMap = Arc<Mutex<HashMap<String, Poller>>>;

struct Poller {
    /// `true` while polling may still deliver updates.
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

/// Independent channels per event type; a slow subscriber on one does not affect the others.
#[derive(Clone)]
struct TrackerEvents {
    created: broadcast::Sender<TrackedRun>,
    updated: broadcast::Sender<TrackedRun>,
    finished: broadcast::Sender<TrackedRun>,
}

impl TrackerEvents {
    fn new() -> Self {
        Self {
            created: broadcast::channel(64).0,
            updated: broadcast::channel(256).0,
            finished: broadcast::channel(64).0,
        }
    }
}

pub struct ExecutionTracker<B: RunBackend> {
    backend: Arc<B>,
    poll_interval: Duration,
    runs: RunMap,
    pollers: PollerMap,
    events: TrackerEvents,
}

impl<B: RunBackend> ExecutionTracker<B> {
    pub fn new(backend: B, poll_interval: Duration) -> Self {
        Self {
            backend: Arc::new(backend),
            poll_interval,
            runs: Arc::new(Mutex::new(HashMap::new())),
            pollers: Arc::new(Mutex::new(HashMap::new())),
            events: TrackerEvents::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subscribe_created(&self) -> broadcast::Receiver<TrackedRun> {
        self.events.created.subscribe()
    }

    pub fn subscribe_updated(&self) -> broadcast::Receiver<TrackedRun> {
        self.events.updated.subscribe()
    }

    pub fn subscribe_finished(&self) -> broadcast::Receiver<TrackedRun> {
        self.events.finished.subscribe()
    }

    /// Submit `message`. A direct response is returned as-is and not tracked; a run is
    /// tracked as `Created` but not polled until [`start_polling`](Self::start_polling).
    pub async fn execute(&self, message: &str, context: Value) -> Result<ExecuteOutcome, ExecutorError> {
        let request = ExecuteRequest {
            message: message.to_string(),
            context,
        };
        match self.backend.create_run(&request).await {
            Ok(ExecuteResponse::DirectResponse { content }) => {
                debug!(len = content.len(), "direct response");
                Ok(ExecuteOutcome::DirectResponse(content))
            }
            Ok(ExecuteResponse::Run { run_id }) => {
                let run = TrackedRun::new(&run_id, Some(message));
                self.insert_run(run);
                info!(run_id = %run_id, "run created");
                Ok(ExecuteOutcome::Run(RunHandle { run_id }))
            }
            Err(e) => {
                warn!(error = %e, "execute failed");
                Err(e)
            }
        }
    }

    fn insert_run(&self, run: TrackedRun) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(run.run_id.clone(), run.clone());
        }
        let _ = self.events.created.send(run);
    }

    /// Start polling a tracked run. Returns `false` if the run is unknown, already
    /// terminal, or already being polled, or if there is no tokio runtime to poll on.
    pub fn start_polling(&self, run_id: &str, on_update: UpdateCallback) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(run_id, "start_polling called outside a tokio runtime");
            return false;
        };
        let Ok(mut pollers) = self.pollers.lock() else {
            return false;
        };
        if pollers.contains_key(run_id) {
            debug!(run_id, "already polling");
            return false;
        }
        match self.get(run_id) {
            Some(run) if !run.status.is_terminal() => {}
            Some(_) => return false,
            None => {
                warn!(run_id, "cannot poll untracked run");
                return false;
            }
        }

        let gate = Arc::new(Mutex::new(true));
        let task = runtime.spawn(poll_loop(PollContext {
            run_id: run_id.to_string(),
            backend: Arc::clone(&self.backend),
            interval: self.poll_interval,
            runs: Arc::clone(&self.runs),
            pollers: Arc::clone(&self.pollers),
            gate: Arc::clone(&gate),
            events: self.events.clone(),
            on_update,
        }));
        pollers.insert(run_id.to_string(), Poller { gate, task });
        debug!(run_id, "polling started");
        true
    }

    pub fn is_polling(&self, run_id: &str) -> bool {
        self.pollers
            .lock()
            .map(|p| p.contains_key(run_id))
            .unwrap_or(false)
    }

    /// Halt polling, forget the run, and ask the executor to cancel it if it was still
    /// active. Returns whether the run was tracked. Calling it again is a no-op.
    pub async fn stop_run(&self, run_id: &str) -> bool {
        let poller = self.pollers.lock().ok().and_then(|mut p| p.remove(run_id));
        if let Some(poller) = poller {
            // Closing the gate waits out a running callback, so it happens on the blocking pool.
            let gate = Arc::clone(&poller.gate);
            let closed = tokio::task::spawn_blocking(move || {
                if let Ok(mut open) = gate.lock() {
                    *open = false;
                }
            })
            .await;
            if let Err(e) = closed {
                warn!(run_id, error = %e, "failed to close poll gate");
            }
            poller.task.abort();
        }

        let Some(mut run) = self.runs.lock().ok().and_then(|mut r| r.remove(run_id)) else {
            return false;
        };

        if !run.status.is_terminal() {
            if let Err(e) = self.backend.cancel_run(run_id).await {
                warn!(run_id, error = %e, "remote cancel failed");
            }
            run.status = RunStatus::Cancelled;
            let _ = self.events.finished.send(run);
        }
        info!(run_id, "run stopped");
        true
    }

    /// Rebuild tracking for every run the executor reports as active and poll each.
    /// Runs already tracked are left alone. Returns the ids that were newly tracked.
    pub async fn resume(&self, on_update: UpdateCallback) -> Result<Vec<String>, ExecutorError> {
        let active = self.backend.list_active_runs().await?;
        let mut resumed = Vec::new();

        for snapshot in active {
            if snapshot.status.is_terminal() || self.get(&snapshot.run_id).is_some() {
                continue;
            }
            let run_id = snapshot.run_id.clone();
            self.insert_run(TrackedRun::from_snapshot(snapshot));
            self.start_polling(&run_id, Arc::clone(&on_update));
            resumed.push(run_id);
        }

        info!(count = resumed.len(), "resumed active runs");
        Ok(resumed)
    }

    pub async fn get_run_details(&self, run_id: &str) -> Result<RunSnapshot, ExecutorError> {
        self.backend.get_run(run_id).await
    }

    pub async fn get_step_details(&self, run_id: &str, step: u32) -> Result<StepDetails, ExecutorError> {
        self.backend.get_step(run_id, step).await
    }

    pub fn get(&self, run_id: &str) -> Option<TrackedRun> {
        self.runs.lock().ok().and_then(|r| r.get(run_id).cloned())
    }

    /// All tracked runs, oldest first.
    pub fn tracked_runs(&self) -> Vec<TrackedRun> {
        let mut runs: Vec<TrackedRun> = self
            .runs
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.run_id.cmp(&b.run_id)));
        runs
    }

    /// Forget runs in a terminal state. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let Ok(mut runs) = self.runs.lock() else {
            return 0;
        };
        let before = runs.len();
        runs.retain(|_, run| !run.status.is_terminal());
        before - runs.len()
    }
}

impl<B: RunBackend> Drop for ExecutionTracker<B> {
    fn drop(&mut self) {
        if let Ok(mut pollers) = self.pollers.lock() {
            for (_, poller) in pollers.drain() {
                poller.task.abort();
            }
        }
    }
}

struct PollContext<B> {
    run_id: String,
    backend: Arc<B>,
    interval: Duration,
    runs: RunMap,
    pollers: PollerMap,
    gate: Arc<Mutex<bool>>,
    events: TrackerEvents,
    on_update: UpdateCallback,
}

async fn poll_loop<B: RunBackend>(ctx: PollContext<B>) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = match ctx.backend.get_run(&ctx.run_id).await {
            Ok(snapshot) => snapshot,
            Err(ExecutorError::NotFound(_)) => {
                warn!(run_id = %ctx.run_id, "run vanished from executor");
                RunSnapshot::not_found(&ctx.run_id)
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "poll failed; retrying");
                continue;
            }
        };

        if !deliver(&ctx, snapshot) {
            break;
        }
    }

    if let Ok(mut pollers) = ctx.pollers.lock() {
        if pollers
            .get(&ctx.run_id)
            .is_some_and(|p| Arc::ptr_eq(&p.gate, &ctx.gate))
        {
            pollers.remove(&ctx.run_id);
        }
    }
    debug!(run_id = %ctx.run_id, "polling stopped");
}

/// Merge a snapshot and notify. Returns whether polling should continue.
fn deliver<B>(ctx: &PollContext<B>, snapshot: RunSnapshot) -> bool {
    let Ok(open) = ctx.gate.lock() else {
        return false;
    };
    if !*open {
        return false;
    }

    let merged = {
        let Ok(mut runs) = ctx.runs.lock() else {
            return false;
        };
        let Some(run) = runs.get_mut(&ctx.run_id) else {
            return false;
        };
        run.apply(snapshot);
        run.clone()
    };

    (ctx.on_update)(&merged);
    let _ = ctx.events.updated.send(merged.clone());

    if merged.status.is_terminal() {
        info!(run_id = %ctx.run_id, status = %merged.status, "run finished");
        let _ = ctx.events.finished.send(merged);
        return false;
    }
    drop(open);
    true
}
