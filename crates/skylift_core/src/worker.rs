//! Long-poll activity worker loop.
//!
//! One task at a time: poll, decode, run the caller's handler while a
//! scoped heartbeat task signals liveness, then send exactly one terminal
//! report per task token. Transport errors are logged and retried with a
//! fixed backoff; only cancellation stops the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::BoxError;

/// Fixed sleep between retries after a failed poll cycle.
pub const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Terminal failure reports carry a summary of at most this many characters.
pub const MAX_FAILURE_SUMMARY_CHARS: usize = 200;

/// One polled unit of work. The token is a one-shot capability: it
/// authorizes heartbeats plus exactly one terminal report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledTask {
    pub token: String,
    pub input: Option<String>,
}

/// Handler-visible context for the in-flight task, for handlers that defer
/// reporting and need the token themselves.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_token: String,
}

/// Terminal outcome of one handler invocation.
///
/// `Deferred` means the handler already reported the outcome out-of-band;
/// the loop sends nothing for it.
pub enum ActivityOutcome<T> {
    Success(T),
    Failure(BoxError),
    Deferred,
}

/// Worker identity and pacing.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Identifier of the activity queue to poll.
    pub activity_arn: String,
    /// Name reported to the coordinator on each poll.
    pub worker_name: String,
    /// Caller-facing heartbeat interval; the liveness signal fires at half
    /// this interval to keep margin against the coordinator's timeout.
    pub heartbeat_interval: Duration,
}

/// Coordinator seam: long-poll for work, signal liveness, report outcomes.
#[async_trait]
pub trait ActivityCoordinator: Send + Sync {
    /// Long-polls for one task. `Ok(None)` means the poll timed out with no
    /// work available.
    async fn poll_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<Option<PolledTask>, BoxError>;

    async fn heartbeat(&self, task_token: &str) -> Result<(), BoxError>;

    async fn report_success(&self, task_token: &str, output: &str) -> Result<(), BoxError>;

    async fn report_failure(
        &self,
        task_token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), BoxError>;
}

/// Errors surfaced from a single poll cycle, or from the loop itself on
/// cancellation.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker cancelled")]
    Cancelled,

    #[error("task poll failed: {0}")]
    Poll(#[source] BoxError),

    #[error("polled task has no input payload")]
    MissingInput,

    #[error("can't decode task input: {0}")]
    DecodeInput(#[source] serde_json::Error),

    #[error("can't encode task output: {0}")]
    EncodeOutput(#[source] serde_json::Error),

    #[error("can't report task success: {0}")]
    ReportSuccess(#[source] BoxError),

    #[error("can't report task failure: {0}")]
    ReportFailure(#[source] BoxError),
}

/// Runs the worker loop until `cancel` fires, then returns
/// [`WorkerError::Cancelled`].
///
/// Each cycle polls for one task, runs `handler` on it, and reports the
/// outcome with that task's token. Cycle errors (poll transport, decode,
/// report delivery) are logged and retried after [`POLL_RETRY_DELAY`]; a
/// task-input decode failure is NOT reported to the coordinator as a task
/// failure, so such a task expires via the coordinator's own timeout.
/// Cancellation is cooperative: it is observed between cycles and does not
/// preempt an in-flight handler.
pub async fn run_activity_worker<C, IN, OUT, F, Fut>(
    coordinator: Arc<C>,
    options: WorkerOptions,
    cancel: CancellationToken,
    mut handler: F,
) -> Result<(), WorkerError>
where
    C: ActivityCoordinator + 'static,
    IN: DeserializeOwned,
    OUT: Serialize,
    F: FnMut(IN, TaskContext) -> Fut,
    Fut: Future<Output = ActivityOutcome<OUT>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        if let Err(error) = poll_once(&coordinator, &options, &mut handler).await {
            tracing::error!(worker = %options.worker_name, %error, "activity poll cycle failed");
            tokio::time::sleep(POLL_RETRY_DELAY).await;
        }
    }
}

async fn poll_once<C, IN, OUT, F, Fut>(
    coordinator: &Arc<C>,
    options: &WorkerOptions,
    handler: &mut F,
) -> Result<(), WorkerError>
where
    C: ActivityCoordinator + 'static,
    IN: DeserializeOwned,
    OUT: Serialize,
    F: FnMut(IN, TaskContext) -> Fut,
    Fut: Future<Output = ActivityOutcome<OUT>>,
{
    let task = match coordinator
        .poll_task(&options.activity_arn, &options.worker_name)
        .await
        .map_err(WorkerError::Poll)?
    {
        Some(task) => task,
        None => return Ok(()),
    };

    let input_text = task.input.as_deref().ok_or(WorkerError::MissingInput)?;
    let input: IN = serde_json::from_str(input_text).map_err(WorkerError::DecodeInput)?;

    // Heartbeat lifetime is scoped to this handler invocation: the drop
    // guard cancels it on every exit path, including early returns below.
    let heartbeat_cancel = CancellationToken::new();
    let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
    tokio::spawn(heartbeat_loop(
        Arc::clone(coordinator),
        task.token.clone(),
        options.heartbeat_interval / 2,
        heartbeat_cancel,
    ));

    let context = TaskContext {
        task_token: task.token.clone(),
    };
    match handler(input, context).await {
        ActivityOutcome::Success(output) => {
            let encoded = serde_json::to_string(&output).map_err(WorkerError::EncodeOutput)?;
            coordinator
                .report_success(&task.token, &encoded)
                .await
                .map_err(WorkerError::ReportSuccess)?;
        }
        ActivityOutcome::Deferred => {}
        ActivityOutcome::Failure(error) => {
            tracing::error!(worker = %options.worker_name, %error, "task handler failed");
            let cause = error.to_string();
            coordinator
                .report_failure(&task.token, &truncate_summary(&cause), &cause)
                .await
                .map_err(WorkerError::ReportFailure)?;
        }
    }
    Ok(())
}

async fn heartbeat_loop<C>(
    coordinator: Arc<C>,
    task_token: String,
    every: Duration,
    cancel: CancellationToken,
) where
    C: ActivityCoordinator,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {
                if let Err(error) = coordinator.heartbeat(&task_token).await {
                    tracing::warn!(%error, "can't send task heartbeat");
                }
            }
        }
    }
}

fn truncate_summary(cause: &str) -> String {
    if cause.chars().count() <= MAX_FAILURE_SUMMARY_CHARS {
        return cause.to_string();
    }
    let mut summary: String = cause.chars().take(MAX_FAILURE_SUMMARY_CHARS - 3).collect();
    summary.push_str("...");
    summary
}
