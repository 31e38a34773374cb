//! Submit-and-poll protocol for remote generation jobs.
//!
//! A job moves `IN_QUEUE -> IN_PROGRESS -> COMPLETED | FAILED` on the remote
//! side. This module only observes: it sleeps, asks for the status, and
//! reacts to terminal states. Anything it does not recognise counts as
//! still waiting.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{GenerationRequest, JobState};
use crate::runpod::JobBackend;

pub const FAILED_FALLBACK_MESSAGE: &str = "Task failed without specific error message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before every status check, including the first.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(5), max_attempts: 120 }
    }
}

impl PollConfig {
    /// Total wait before giving up, saturating at `Duration::MAX`.
    pub fn budget(&self) -> Duration {
        self.elapsed_after(self.max_attempts)
    }

    fn elapsed_after(&self, attempts: u32) -> Duration {
        self.interval.saturating_mul(attempts)
    }
}

/// Observable step of a generation, rendered as the progress line shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Starting,
    Started { job_id: String },
    Checking { attempt: u32, max_attempts: u32 },
    Queued { elapsed_secs: u64 },
    Running { elapsed_secs: u64 },
    Waiting { status: String, elapsed_secs: u64 },
    Completed,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Starting => write!(f, "Starting task..."),
            Progress::Started { job_id } => write!(f, "Task started with ID: {job_id}. Checking status..."),
            Progress::Checking { attempt, max_attempts } => {
                write!(f, "Checking status... (attempt {attempt}/{max_attempts})")
            }
            Progress::Queued { elapsed_secs } => write!(f, "Task in queue... ({elapsed_secs}s elapsed)"),
            Progress::Running { elapsed_secs } => write!(f, "Task in progress... ({elapsed_secs}s elapsed)"),
            Progress::Waiting { status, elapsed_secs } => {
                write!(f, "Task status {status}... ({elapsed_secs}s elapsed)")
            }
            Progress::Completed => write!(f, "Task completed successfully!"),
        }
    }
}

/// Polls `job_id` until it reaches a terminal state or the budget runs out.
///
/// A failed status request ends the loop immediately with that error. The
/// completed output is returned exactly as the backend reported it.
pub async fn poll_job<B, F>(
    backend: &B,
    job_id: &str,
    config: &PollConfig,
    mut on_progress: F,
) -> AppResult<Value>
where
    B: JobBackend + ?Sized,
    F: FnMut(&Progress),
{
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.interval).await;
        on_progress(&Progress::Checking { attempt, max_attempts: config.max_attempts });

        let status = backend.status(job_id).await?;
        let elapsed_secs = config.elapsed_after(attempt).as_secs();

        match status.status {
            JobState::Completed => {
                let Some(output) = status.output else {
                    warn!("⚠️ Task {} reported COMPLETED without output", job_id);
                    return Err(AppError::CompletedWithoutResult(job_id.to_string()));
                };
                info!("✅ Task {} completed after {} checks", job_id, attempt);
                on_progress(&Progress::Completed);
                return Ok(output);
            }
            JobState::Failed => {
                let message = status
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| FAILED_FALLBACK_MESSAGE.to_string());
                warn!("❌ Task {} failed: {}", job_id, message);
                return Err(AppError::JobFailed(message));
            }
            JobState::InQueue => on_progress(&Progress::Queued { elapsed_secs }),
            JobState::InProgress => on_progress(&Progress::Running { elapsed_secs }),
            JobState::Other(other) => on_progress(&Progress::Waiting { status: other, elapsed_secs }),
        }
    }

    warn!("⏱️ Task {} still not finished after {} checks", job_id, config.max_attempts);
    Err(AppError::Timeout {
        attempts: config.max_attempts,
        elapsed_secs: config.budget().as_secs(),
    })
}

/// Validates and submits `request`, then polls it to completion.
///
/// Validation failures return before the backend is contacted.
pub async fn generate<B, F>(
    backend: &B,
    request: GenerationRequest,
    config: &PollConfig,
    mut on_progress: F,
) -> AppResult<Value>
where
    B: JobBackend + ?Sized,
    F: FnMut(&Progress),
{
    let (_, request) = request.prepare()?;
    on_progress(&Progress::Starting);
    let job_id = backend.submit(&request).await?;
    on_progress(&Progress::Started { job_id: job_id.clone() });
    poll_job(backend, &job_id, config, on_progress).await
}
