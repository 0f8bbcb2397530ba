use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Spooler query failed: {0}")]
    SpoolerQuery(String),

    #[error("Job not found: {0}")]
    JobNotFound(u32),

    #[error("Job submission failed: {0}")]
    Submit(String),

    #[error("Failed to spawn {provider}: {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// True when the spooler no longer knows the job. Watchers treat this as
    /// a terminal outcome rather than a failure to retry.
    pub fn is_job_not_found(&self) -> bool {
        matches!(self, AgentError::JobNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
