//! Per-job supervision from submission to a terminal state.
//!
//! A [`JobWatcher`] polls the spooler for one job and reports:
//! - every change of the job's state (not every poll)
//! - every increase of the completed page count after the first observation
//! - a final summary with the elapsed time once the job is terminal
//!
//! # State machine
//!
//! ```text
//! Pending ──► Held / Processing / Stopped ──► Cancelled / Aborted / Completed
//!    └──────────────── any state ───────────► NotFound (spooler forgot the job)
//! ```
//!
//! The first observed state is whatever the spooler reports first.
//! Messages reach the optional [`UpdateSink`] strictly in poll order.

pub mod sink;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::spooler::Spooler;

pub use sink::{ControlPlaneSink, UpdateSink};
pub use state::JobState;

const DEFAULT_MAX_TRANSIENT_ERRORS: u32 = 10;

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOutcome {
    pub job_id: u32,
    pub state: JobState,
    /// Last observed completed page count
    pub pages: Option<u32>,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct JobWatcher {
    spooler: Arc<dyn Spooler>,
    poll_interval: Duration,
    max_transient_errors: u32,
}

impl JobWatcher {
    pub fn new(spooler: Arc<dyn Spooler>, poll_interval: Duration) -> Self {
        Self {
            spooler,
            poll_interval,
            max_transient_errors: DEFAULT_MAX_TRANSIENT_ERRORS,
        }
    }

    pub fn from_config(spooler: Arc<dyn Spooler>, config: &SupervisorConfig) -> Self {
        Self::new(spooler, config.watch_poll_interval)
            .with_max_transient_errors(config.watch_max_transient_errors)
    }

    /// Give up after this many consecutive failed queries (other than
    /// "job not found"). Values below 1 are treated as 1.
    pub fn with_max_transient_errors(mut self, max: u32) -> Self {
        self.max_transient_errors = max.max(1);
        self
    }

    /// Poll `job_id` until it reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the last query error once `max_transient_errors` consecutive
    /// queries have failed. "Job not found" is never an error: it ends the
    /// watch with [`JobState::NotFound`].
    pub async fn watch(&self, job_id: u32, sink: Option<&dyn UpdateSink>) -> Result<WatchOutcome> {
        let start = Instant::now();
        let mut last_state: Option<JobState> = None;
        let mut last_pages: Option<u32> = None;
        let mut failures = 0u32;

        tracing::info!(job_id, poll_interval = ?self.poll_interval, "Watching job");

        loop {
            let attrs = match self.spooler.job_attributes(job_id).await {
                Ok(attrs) => {
                    failures = 0;
                    attrs
                }
                Err(e) if e.is_job_not_found() => {
                    let elapsed = start.elapsed();
                    let message = format!(
                        "[JOB {}] no longer in queue/history after {:.2}s",
                        job_id,
                        elapsed.as_secs_f64()
                    );
                    Self::emit(sink, job_id, message).await;
                    return Ok(WatchOutcome {
                        job_id,
                        state: JobState::NotFound,
                        pages: last_pages,
                        elapsed,
                    });
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id, error = %e, failures, "Job query failed");
                    if failures >= self.max_transient_errors {
                        return Err(e);
                    }
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let state = JobState::from_code(attrs.state_code);
            let pages = attrs.pages_completed;

            if last_state != Some(state) {
                let message = format!(
                    "[JOB {}] state={}, pages={}",
                    job_id,
                    state,
                    pages.unwrap_or(0)
                );
                Self::emit(sink, job_id, message).await;
                last_state = Some(state);
            }

            if let Some(current) = pages {
                if last_pages.is_some_and(|previous| current > previous) {
                    let message = format!("[JOB {}] progress: pages={}", job_id, current);
                    Self::emit(sink, job_id, message).await;
                }
                last_pages = Some(current);
            }

            if state.is_terminal() {
                let elapsed = start.elapsed();
                Self::emit(sink, job_id, summary(job_id, state, pages, elapsed)).await;
                return Ok(WatchOutcome {
                    job_id,
                    state,
                    pages: last_pages,
                    elapsed,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn emit(sink: Option<&dyn UpdateSink>, job_id: u32, message: String) {
        tracing::info!(job_id, "{}", message);
        sink::notify(sink, &message).await;
    }
}

fn summary(job_id: u32, state: JobState, pages: Option<u32>, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    match state {
        JobState::Completed => format!(
            "[JOB {}] completed in {:.2}s (pages={})",
            job_id,
            secs,
            pages.unwrap_or(0)
        ),
        JobState::Cancelled => format!("[JOB {}] cancelled after {:.2}s", job_id, secs),
        JobState::Aborted => format!("[JOB {}] aborted after {:.2}s", job_id, secs),
        other => format!("[JOB {}] {} after {:.2}s", job_id, other, secs),
    }
}
