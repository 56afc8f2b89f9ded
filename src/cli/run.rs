//! CLI `run` and `resume` commands: follow remote runs in the terminal.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use memvault::config::VaultConfig;
use memvault::execution::{
    self, ExecuteOutcome, ExecutionTracker, RunBackend, RunStatus, TrackedRun, UpdateCallback,
};
use memvault::handlers::BUILD_CONTEXT;

/// Submit `message` and follow the resulting run until it finishes.
pub async fn run(config: VaultConfig, message: &str) -> Result<()> {
    let tracker = execution::http_tracker(&config.executor)?;
    let context = vault_context(config).await;

    match tracker.execute(message, context).await? {
        ExecuteOutcome::DirectResponse(content) => {
            println!("{content}");
            Ok(())
        }
        ExecuteOutcome::Run(handle) => {
            println!("Run {} created", handle.run_id);
            let finished = tracker.subscribe_finished();
            tracker.start_polling(&handle.run_id, progress_printer());
            follow(&tracker, finished, vec![handle.run_id]).await
        }
    }
}

/// Re-attach to every run the executor still reports as active.
pub async fn resume(config: VaultConfig) -> Result<()> {
    let tracker = execution::http_tracker(&config.executor)?;
    let finished = tracker.subscribe_finished();
    let resumed = tracker.resume(progress_printer()).await?;

    if resumed.is_empty() {
        println!("No active runs.");
        return Ok(());
    }
    println!("Following {} active run(s)", resumed.len());
    follow(&tracker, finished, resumed).await
}

/// Vault context for the executor, or null if the vault is unavailable.
async fn vault_context(config: VaultConfig) -> Value {
    let (manager, registry) = match super::open_ready(config).await {
        Ok(ready) => ready,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "running without vault context");
            return Value::Null;
        }
    };
    let context = registry
        .invoke(BUILD_CONTEXT, Value::Null)
        .await
        .map(|v| v["prompt"].clone())
        .unwrap_or(Value::Null);
    manager.cleanup();
    context
}

fn progress_printer() -> UpdateCallback {
    Arc::new(|run: &TrackedRun| match (run.current_step, run.total_steps) {
        (Some(step), Some(total)) => eprintln!("[{}] {} (step {step}/{total})", run.run_id, run.status),
        _ => eprintln!("[{}] {}", run.run_id, run.status),
    })
}

/// Wait until every run in `run_ids` finishes. Ctrl-C stops the remaining ones.
async fn follow<B: RunBackend>(
    tracker: &ExecutionTracker<B>,
    mut finished: tokio::sync::broadcast::Receiver<TrackedRun>,
    run_ids: Vec<String>,
) -> Result<()> {
    let mut pending: HashSet<String> = run_ids.into_iter().collect();

    while !pending.is_empty() {
        tokio::select! {
            event = finished.recv() => match event {
                Ok(run) => {
                    if pending.remove(&run.run_id) {
                        report(&run);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed run events");
                    pending.retain(|id| match tracker.get(id) {
                        Some(run) if run.status.is_terminal() => {
                            report(&run);
                            false
                        }
                        _ => true,
                    });
                }
                Err(RecvError::Closed) => return Err(anyhow!("tracker shut down")),
            },
            _ = tokio::signal::ctrl_c() => {
                for run_id in pending.drain() {
                    tracker.stop_run(&run_id).await;
                    println!("Run {run_id} cancelled");
                }
            }
        }
    }
    Ok(())
}

fn report(run: &TrackedRun) {
    match run.status {
        RunStatus::Complete => {
            println!("Run {} complete", run.run_id);
            if let Some(ref output) = run.output {
                println!("{output}");
            }
        }
        status => {
            println!("Run {} ended: {status}", run.run_id);
            if let Some(ref error) = run.error {
                println!("  {error}");
            }
        }
    }
}
