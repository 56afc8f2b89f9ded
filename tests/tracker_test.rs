use memvault::execution::{
    ExecuteOutcome, ExecuteRequest, ExecuteResponse, ExecutionTracker, ExecutorError, RunBackend,
    RunSnapshot, RunStatus, StepDetails, TrackedRun, UpdateCallback,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const INTERVAL: Duration = Duration::from_millis(10);

/// What the fake executor answers for one poll. The last step of a script repeats.
#[derive(Clone, Copy)]
enum Step {
    Status(RunStatus),
    NotFound,
    Fail,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Step>>,
    polls: HashMap<String, usize>,
    cancelled: Vec<String>,
    active: Vec<RunSnapshot>,
    create: Option<ExecuteResponse>,
}

#[derive(Clone, Default)]
struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    fn script(&self, run_id: &str, steps: &[Step]) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(run_id.to_string(), steps.iter().copied().collect());
    }

    fn respond_with(&self, response: ExecuteResponse) {
        self.state.lock().unwrap().create = Some(response);
    }

    fn set_active(&self, runs: Vec<RunSnapshot>) {
        self.state.lock().unwrap().active = runs;
    }

    fn polls(&self, run_id: &str) -> usize {
        self.state.lock().unwrap().polls.get(run_id).copied().unwrap_or(0)
    }

    fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

fn snapshot(run_id: &str, status: RunStatus) -> RunSnapshot {
    RunSnapshot {
        run_id: run_id.to_string(),
        status,
        current_step: None,
        total_steps: Some(3),
        output: None,
        error: None,
    }
}

impl RunBackend for MockBackend {
    async fn create_run(&self, _request: &ExecuteRequest) -> Result<ExecuteResponse, ExecutorError> {
        self.state
            .lock()
            .unwrap()
            .create
            .clone()
            .ok_or_else(|| ExecutorError::Decode("no create response scripted".into()))
    }

    async fn get_run(&self, run_id: &str) -> Result<RunSnapshot, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        let polls = {
            let count = state.polls.entry(run_id.to_string()).or_default();
            *count += 1;
            *count
        };
        let step = match state.scripts.get_mut(run_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        }
        .unwrap_or(Step::Status(RunStatus::Running));

        match step {
            Step::Status(status) => Ok(RunSnapshot {
                current_step: Some(polls as u32),
                output: (status == RunStatus::Complete).then(|| "done".to_string()),
                ..snapshot(run_id, status)
            }),
            Step::NotFound => Err(ExecutorError::NotFound(format!("run {run_id}"))),
            Step::Fail => Err(ExecutorError::Status {
                status: 503,
                body: "busy".into(),
            }),
        }
    }

    async fn get_step(&self, run_id: &str, step: u32) -> Result<StepDetails, ExecutorError> {
        Ok(StepDetails {
            run_id: run_id.to_string(),
            step,
            title: Some(format!("step {step}")),
            status: Some("complete".into()),
            output: None,
            error: None,
        })
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ExecutorError> {
        self.state.lock().unwrap().cancelled.push(run_id.to_string());
        Ok(())
    }

    async fn list_active_runs(&self) -> Result<Vec<RunSnapshot>, ExecutorError> {
        Ok(self.state.lock().unwrap().active.clone())
    }
}

/// Callback that records every status it sees.
fn recorder() -> (UpdateCallback, Arc<Mutex<Vec<RunStatus>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: UpdateCallback = Arc::new(move |run: &TrackedRun| {
        sink.lock().unwrap().push(run.status);
    });
    (callback, seen)
}

fn seen_len(seen: &Arc<Mutex<Vec<RunStatus>>>) -> usize {
    seen.lock().unwrap().len()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn tracked(backend: &MockBackend, run_id: &str, steps: &[Step]) -> ExecutionTracker<MockBackend> {
    backend.script(run_id, steps);
    backend.respond_with(ExecuteResponse::Run {
        run_id: run_id.to_string(),
    });
    let tracker = ExecutionTracker::new(backend.clone(), INTERVAL);
    let outcome = tracker.execute("plan a trip", Value::Null).await.unwrap();
    assert!(matches!(outcome, ExecuteOutcome::Run(ref h) if h.run_id == run_id));
    tracker
}

#[tokio::test]
async fn polling_ends_at_terminal_status() {
    let backend = MockBackend::default();
    let tracker = tracked(
        &backend,
        "r1",
        &[
            Step::Status(RunStatus::Running),
            Step::Status(RunStatus::Running),
            Step::Status(RunStatus::Complete),
        ],
    )
    .await;
    let mut finished = tracker.subscribe_finished();
    let (callback, seen) = recorder();

    assert!(tracker.start_polling("r1", callback));
    wait_until(|| !tracker.is_polling("r1")).await;

    assert_eq!(
        *seen.lock().unwrap(),
        [RunStatus::Running, RunStatus::Running, RunStatus::Complete]
    );
    let polls = backend.polls("r1");
    assert_eq!(polls, 3);

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(backend.polls("r1"), polls);
    assert_eq!(seen_len(&seen), 3);

    let done = finished.recv().await.unwrap();
    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.output.as_deref(), Some("done"));
    assert_eq!(done.message.as_deref(), Some("plan a trip"));

    let (callback, _) = recorder();
    assert!(!tracker.start_polling("r1", callback));
}

#[tokio::test]
async fn resume_tracks_each_active_run_once() {
    let backend = MockBackend::default();
    backend.set_active(vec![
        snapshot("a", RunStatus::Running),
        snapshot("b", RunStatus::Created),
        snapshot("c", RunStatus::Complete),
    ]);
    let tracker = ExecutionTracker::new(backend.clone(), INTERVAL);
    let (callback, _) = recorder();

    let resumed = tracker.resume(Arc::clone(&callback)).await.unwrap();
    assert_eq!(resumed, ["a", "b"]);
    assert_eq!(tracker.tracked_runs().len(), 2);
    assert!(tracker.is_polling("a"));
    assert!(tracker.is_polling("b"));

    assert!(tracker.resume(Arc::clone(&callback)).await.unwrap().is_empty());
    assert!(!tracker.start_polling("a", callback));
    assert_eq!(tracker.tracked_runs().len(), 2);

    wait_until(|| backend.polls("a") > 0 && backend.polls("b") > 0).await;
}

#[tokio::test]
async fn stop_run_halts_callbacks_and_cancels_once() {
    let backend = MockBackend::default();
    let tracker = tracked(&backend, "r1", &[Step::Status(RunStatus::Running)]).await;
    let mut finished = tracker.subscribe_finished();
    let (callback, seen) = recorder();

    assert!(tracker.start_polling("r1", callback));
    wait_until(|| seen_len(&seen) >= 2).await;

    assert!(tracker.stop_run("r1").await);
    let after_stop = seen_len(&seen);
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(seen_len(&seen), after_stop);

    assert!(!tracker.is_polling("r1"));
    assert!(tracker.get("r1").is_none());
    assert_eq!(finished.recv().await.unwrap().status, RunStatus::Cancelled);

    assert!(!tracker.stop_run("r1").await);
    assert_eq!(backend.cancelled(), ["r1"]);
}

#[tokio::test]
async fn vanished_run_becomes_error() {
    let backend = MockBackend::default();
    let tracker = tracked(&backend, "r1", &[Step::Status(RunStatus::Running), Step::NotFound]).await;
    let mut finished = tracker.subscribe_finished();
    let (callback, seen) = recorder();

    tracker.start_polling("r1", callback);
    let done = finished.recv().await.unwrap();

    assert_eq!(done.status, RunStatus::Error);
    assert_eq!(done.error.as_deref(), Some("run not found"));
    assert_eq!(*seen.lock().unwrap(), [RunStatus::Running, RunStatus::Error]);
    wait_until(|| !tracker.is_polling("r1")).await;
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let backend = MockBackend::default();
    let tracker = tracked(
        &backend,
        "r1",
        &[Step::Fail, Step::Fail, Step::Status(RunStatus::Complete)],
    )
    .await;
    let mut finished = tracker.subscribe_finished();
    let (callback, seen) = recorder();

    tracker.start_polling("r1", callback);
    assert_eq!(finished.recv().await.unwrap().status, RunStatus::Complete);

    assert_eq!(backend.polls("r1"), 3);
    assert_eq!(*seen.lock().unwrap(), [RunStatus::Complete]);
}

#[tokio::test]
async fn direct_response_is_not_tracked() {
    let backend = MockBackend::default();
    backend.respond_with(ExecuteResponse::DirectResponse {
        content: "It is 4pm.".into(),
    });
    let tracker = ExecutionTracker::new(backend.clone(), INTERVAL);
    let mut created = tracker.subscribe_created();

    let outcome = tracker.execute("what time is it", Value::Null).await.unwrap();

    assert_eq!(outcome, ExecuteOutcome::DirectResponse("It is 4pm.".into()));
    assert!(tracker.tracked_runs().is_empty());
    assert!(created.try_recv().is_err());
}

#[tokio::test]
async fn clear_finished_keeps_active_runs() {
    let backend = MockBackend::default();
    let tracker = tracked(&backend, "done", &[Step::Status(RunStatus::Complete)]).await;
    backend.script("busy", &[Step::Status(RunStatus::Running)]);
    backend.respond_with(ExecuteResponse::Run {
        run_id: "busy".into(),
    });
    tracker.execute("keep going", Value::Null).await.unwrap();

    let (callback, _) = recorder();
    tracker.start_polling("done", Arc::clone(&callback));
    tracker.start_polling("busy", callback);
    wait_until(|| !tracker.is_polling("done") && backend.polls("busy") > 0).await;

    assert_eq!(tracker.clear_finished(), 1);
    let remaining: Vec<String> = tracker.tracked_runs().into_iter().map(|r| r.run_id).collect();
    assert_eq!(remaining, ["busy"]);
    assert_eq!(tracker.clear_finished(), 0);

    assert!(tracker.stop_run("busy").await);
    assert_eq!(backend.cancelled(), ["busy"]);
}

#[tokio::test]
async fn untracked_runs_are_not_polled() {
    let backend = MockBackend::default();
    let tracker = ExecutionTracker::new(backend.clone(), INTERVAL);
    let (callback, _) = recorder();

    assert!(!tracker.start_polling("ghost", callback));
    assert!(!tracker.stop_run("ghost").await);
    assert!(backend.cancelled().is_empty());

    let step = tracker.get_step_details("ghost", 2).await.unwrap();
    assert_eq!(step.title.as_deref(), Some("step 2"));
}

#[tokio::test]
async fn execute_errors_surface() {
    let tracker = ExecutionTracker::new(MockBackend::default(), INTERVAL);
    let err = tracker.execute("hello", Value::Null).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Decode(_)));
    assert!(tracker.tracked_runs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_run_waits_for_callback_without_stalling_workers() {
    let backend = MockBackend::default();
    let tracker = Arc::new(tracked(&backend, "r1", &[Step::Status(RunStatus::Running)]).await);

    let entered = Arc::new(AtomicBool::new(false));
    let returned = Arc::new(AtomicBool::new(false));
    let callback: UpdateCallback = Arc::new({
        let entered = Arc::clone(&entered);
        let returned = Arc::clone(&returned);
        move |_: &TrackedRun| {
            if !entered.swap(true, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(300));
                returned.store(true, Ordering::SeqCst);
            }
        }
    });
    assert!(tracker.start_polling("r1", callback));
    wait_until(|| entered.load(Ordering::SeqCst)).await;

    // One worker is inside the callback; the other runs stop_run.
    let beats = Arc::new(AtomicUsize::new(0));
    let heartbeat = tokio::spawn({
        let beats = Arc::clone(&beats);
        async move {
            loop {
                beats.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });
    let stopped = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.stop_run("r1").await }
    });

    assert!(stopped.await.unwrap());
    assert!(returned.load(Ordering::SeqCst));
    assert!(beats.load(Ordering::SeqCst) > 10);
    heartbeat.abort();
}

#[test]
fn start_polling_needs_a_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend = MockBackend::default();
    let tracker = runtime.block_on(tracked(&backend, "r1", &[Step::Status(RunStatus::Running)]));
    let (callback, _) = recorder();

    assert!(!tracker.start_polling("r1", Arc::clone(&callback)));
    assert!(!tracker.is_polling("r1"));

    runtime.block_on(async {
        assert!(tracker.start_polling("r1", callback));
        assert!(tracker.stop_run("r1").await);
    });
}
