//! Stale-queue detection and whole-queue cancellation.
//!
//! A single job waiting longer than the threshold is taken as a sign that the
//! print pipeline is wedged, so the sweep cancels every pending job in every
//! queue, fresh ones included. This collateral cancellation is intentional.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;
use crate::queue::{self, QueueEntry};
use crate::spooler::Spooler;

/// A job the spooler refused to cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelFailure {
    pub job: String,
    pub error: String,
}

/// Outcome of cancelling every pending job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CancelReport {
    pub found: usize,
    pub canceled: usize,
    pub errors: Vec<CancelFailure>,
}

/// Outcome of one stale check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StaleCheck {
    /// The queue was empty
    NoJobs,
    /// Jobs are queued but none is old enough
    WithinThreshold { found: usize, max_age: f64 },
    /// The threshold was reached and a full sweep ran
    Cancelled { max_age: f64, report: CancelReport },
}

pub struct StaleQueueCanceller {
    spooler: Arc<dyn Spooler>,
    clock: Arc<dyn Clock>,
}

impl StaleQueueCanceller {
    pub fn new(spooler: Arc<dyn Spooler>, clock: Arc<dyn Clock>) -> Self {
        Self { spooler, clock }
    }

    /// Current pending jobs across all queues.
    pub async fn snapshot(&self) -> Result<Vec<QueueEntry>> {
        let output = self.spooler.list_pending(None).await?;
        queue::parse_listing(&output, self.clock.now())
    }

    /// Cancel everything if the oldest job has waited `threshold_minutes` or more.
    ///
    /// # Errors
    ///
    /// Fails only when the queue cannot be listed. Individual cancel failures
    /// are collected in the returned [`CancelReport`].
    pub async fn check_and_cancel(&self, threshold_minutes: u32) -> Result<StaleCheck> {
        let entries = self.snapshot().await?;
        if entries.is_empty() {
            tracing::info!("No jobs in queue");
            return Ok(StaleCheck::NoJobs);
        }

        let max_age = queue::max_age(&entries);
        tracing::info!(
            jobs = entries.len(),
            max_age,
            threshold_minutes,
            "Queue check"
        );

        if max_age < f64::from(threshold_minutes) {
            return Ok(StaleCheck::WithinThreshold {
                found: entries.len(),
                max_age,
            });
        }

        tracing::warn!(max_age, threshold_minutes, "Stale queue detected, cancelling all jobs");
        let report = self.cancel_all().await?;
        tracing::info!(
            found = report.found,
            canceled = report.canceled,
            errors = report.errors.len(),
            "Cancel sweep finished"
        );
        Ok(StaleCheck::Cancelled { max_age, report })
    }

    /// Cancel every pending job in every queue, one at a time.
    ///
    /// Re-lists the queue first so jobs queued since the last snapshot are
    /// included. Partial failure leaves the rest cancelled; callers may retry.
    pub async fn cancel_all(&self) -> Result<CancelReport> {
        let entries = self.snapshot().await?;
        let mut report = CancelReport {
            found: entries.len(),
            ..Default::default()
        };

        for entry in entries.iter().filter(|e| !e.job_name.is_empty()) {
            match self.spooler.cancel(&entry.job_name).await {
                Ok(()) => {
                    tracing::debug!(job = %entry.job_name, "Cancelled job");
                    report.canceled += 1;
                }
                Err(error) => {
                    tracing::warn!(job = %entry.job_name, error = %error, "Failed to cancel job");
                    report.errors.push(CancelFailure {
                        job: entry.job_name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }
}
