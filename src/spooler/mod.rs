//! Boundary to the local print spooler.
//!
//! Everything the agent needs from the spooler goes through [`Spooler`]:
//! - **Submission**: hand a file to a printer queue and get a job id back
//! - **Attributes**: current state code and completed page count of a job
//! - **Cancel**: remove a queued job by its queue-qualified name
//! - **Listing**: raw text of the "not completed" listing for the parser
//! - **Printers**: installed destinations with their state
//!
//! # Components
//!
//! - [`CupsCli`]: implementation over the CUPS command-line tools

pub mod cups;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use cups::CupsCli;

/// Snapshot of one job as reported by the spooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobAttributes {
    /// IPP `job-state` enum value (3..=9 for known states)
    pub state_code: i32,
    /// `job-media-sheets-completed`, when the spooler reports it
    pub pages_completed: Option<u32>,
}

/// Raw result of the pending-jobs listing command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ListingOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }
}

/// Printer state as the spooler reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
    Unknown,
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrinterState::Idle => "idle",
            PrinterState::Processing => "processing",
            PrinterState::Stopped => "stopped",
            PrinterState::Unknown => "unknown",
        })
    }
}

/// One installed destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterInfo {
    pub name: String,
    pub state: PrinterState,
    /// `printer-state-reasons`; empty when there are none
    pub reasons: Vec<String>,
    pub accepting: bool,
    pub is_default: bool,
}

/// Spooler job options, e.g. `ColorModel=Gray`, `copies=2`.
pub type JobOptions = BTreeMap<String, String>;

#[async_trait]
pub trait Spooler: Send + Sync {
    /// Submit `file` to `printer` and return the spooler job id.
    async fn submit(
        &self,
        printer: &str,
        file: &Path,
        title: &str,
        options: &JobOptions,
    ) -> Result<u32>;

    /// Query a job. Fails with [`AgentError::JobNotFound`](crate::error::AgentError::JobNotFound)
    /// once the spooler no longer knows the id.
    async fn job_attributes(&self, job_id: u32) -> Result<JobAttributes>;

    /// Cancel a job by name (`<queue>-<id>`). `Err` carries the spooler's message.
    async fn cancel(&self, job_name: &str) -> std::result::Result<(), String>;

    /// Run the not-completed listing, optionally for one printer only.
    async fn list_pending(&self, printer: Option<&str>) -> Result<ListingOutput>;

    /// The system default destination, if one is configured.
    async fn default_printer(&self) -> Result<Option<String>>;

    /// Installed destinations in the spooler's listing order.
    async fn list_printers(&self) -> Result<Vec<PrinterInfo>>;
}
