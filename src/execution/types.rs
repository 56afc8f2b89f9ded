//! Wire and tracking types for remote runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[serde(alias = "pending", alias = "queued")]
    Created,
    #[serde(alias = "in_progress")]
    Running,
    #[serde(alias = "completed", alias = "succeeded")]
    Complete,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
    Error,
    /// Answered without a multi-step run; never polled.
    DirectResponse,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::DirectResponse => "direct_response",
        };
        f.write_str(s)
    }
}

/// Run status as reported by `GET /runs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    #[serde(alias = "id")]
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub current_step: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunSnapshot {
    /// Stand-in for a run the executor no longer knows about.
    pub fn not_found(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Error,
            current_step: None,
            total_steps: None,
            output: None,
            error: Some("run not found".into()),
        }
    }
}

/// One step of a run, from `GET /runs/{id}/steps/{step}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetails {
    pub run_id: String,
    #[serde(alias = "index")]
    pub step: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

/// Response of `POST /runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteResponse {
    DirectResponse { content: String },
    Run { run_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// Terminal immediately; nothing is tracked.
    DirectResponse(String),
    Run(RunHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
}

/// Local view of a run, merged from successive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedRun {
    pub run_id: String,
    pub status: RunStatus,
    /// The request that started the run, when it was started from this process.
    pub message: Option<String>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TrackedRun {
    pub fn new(run_id: &str, message: Option<&str>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Created,
            message: message.map(str::to_string),
            current_step: None,
            total_steps: None,
            output: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn from_snapshot(snapshot: RunSnapshot) -> Self {
        let mut run = Self::new(&snapshot.run_id, None);
        run.apply(snapshot);
        run
    }

    /// Merge a fresh snapshot. Fields the executor omitted keep their previous values.
    pub fn apply(&mut self, snapshot: RunSnapshot) {
        self.status = snapshot.status;
        self.current_step = snapshot.current_step.or(self.current_step);
        self.total_steps = snapshot.total_steps.or(self.total_steps);
        self.output = snapshot.output.or(self.output.take());
        self.error = snapshot.error.or(self.error.take());
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
