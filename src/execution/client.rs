//! Executor backend abstraction and its HTTP implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use super::types::{ExecuteRequest, ExecuteResponse, RunSnapshot, StepDetails};
use crate::config::ExecutorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor answered 404: the run (or step) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("executor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("executor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected executor response: {0}")]
    Decode(String),
}

/// The remote side of run execution.
///
/// All methods return `Send` futures so trackers can poll from spawned tasks.
pub trait RunBackend: Send + Sync + 'static {
    fn create_run(
        &self,
        request: &ExecuteRequest,
    ) -> impl Future<Output = Result<ExecuteResponse, ExecutorError>> + Send;

    fn get_run(&self, run_id: &str) -> impl Future<Output = Result<RunSnapshot, ExecutorError>> + Send;

    fn get_step(
        &self,
        run_id: &str,
        step: u32,
    ) -> impl Future<Output = Result<StepDetails, ExecutorError>> + Send;

    fn cancel_run(&self, run_id: &str) -> impl Future<Output = Result<(), ExecutorError>> + Send;

    /// Runs the executor still considers in flight.
    fn list_active_runs(&self) -> impl Future<Output = Result<Vec<RunSnapshot>, ExecutorError>> + Send;
}

/// [`RunBackend`] over the executor's JSON REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpRunBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActiveRuns {
    List(Vec<RunSnapshot>),
    Wrapped { runs: Vec<RunSnapshot> },
}

impl HttpRunBackend {
    pub fn new(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Vec<u8>, ExecutorError> {
        let resp = self.auth(req).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExecutorError::NotFound(what.to_string()));
        }
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> Result<T, ExecutorError> {
        let body = self.send(req, what).await?;
        serde_json::from_slice(&body).map_err(|e| ExecutorError::Decode(format!("{what}: {e}")))
    }
}

impl RunBackend for HttpRunBackend {
    async fn create_run(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, ExecutorError> {
        let req = self.client.post(self.url("/runs")).json(request);
        self.send_json(req, "POST /runs").await
    }

    async fn get_run(&self, run_id: &str) -> Result<RunSnapshot, ExecutorError> {
        let req = self.client.get(self.url(&format!("/runs/{run_id}")));
        self.send_json(req, &format!("run {run_id}")).await
    }

    async fn get_step(&self, run_id: &str, step: u32) -> Result<StepDetails, ExecutorError> {
        let req = self.client.get(self.url(&format!("/runs/{run_id}/steps/{step}")));
        self.send_json(req, &format!("run {run_id} step {step}")).await
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ExecutorError> {
        let req = self.client.post(self.url(&format!("/runs/{run_id}/cancel")));
        self.send(req, &format!("run {run_id}")).await?;
        Ok(())
    }

    async fn list_active_runs(&self) -> Result<Vec<RunSnapshot>, ExecutorError> {
        let req = self.client.get(self.url("/runs?status=active"));
        let runs: ActiveRuns = self.send_json(req, "GET /runs").await?;
        Ok(match runs {
            ActiveRuns::List(runs) | ActiveRuns::Wrapped { runs } => runs,
        })
    }
}
