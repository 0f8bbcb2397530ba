use std::sync::Arc;

use async_trait::async_trait;

use crate::control_plane::ControlPlane;
use crate::error::Result;

/// Receives watcher messages. Failures are logged by the watcher and never
/// stop it.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn on_update(&self, message: &str) -> Result<()>;
}

/// Deliver `message` to `sink`, logging (never propagating) a failure.
pub(crate) async fn notify(sink: Option<&dyn UpdateSink>, message: &str) {
    if let Some(sink) = sink {
        if let Err(e) = sink.on_update(message).await {
            tracing::warn!(error = %e, "Update callback failed, continuing");
        }
    }
}

/// Forwards watcher messages to the control plane under a job reference id.
#[derive(Clone)]
pub struct ControlPlaneSink {
    control_plane: Arc<dyn ControlPlane>,
    ref_id: String,
    prefix: Option<String>,
}

impl ControlPlaneSink {
    pub fn new(control_plane: Arc<dyn ControlPlane>, ref_id: impl Into<String>) -> Self {
        Self {
            control_plane,
            ref_id: ref_id.into(),
            prefix: None,
        }
    }

    /// Prepend `prefix` (e.g. `file 2/3`) to every forwarded message.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    /// Report a status string directly, outside of a watch.
    pub async fn report(&self, message: &str) -> Result<()> {
        self.on_update(message).await
    }
}

#[async_trait]
impl UpdateSink for ControlPlaneSink {
    async fn on_update(&self, message: &str) -> Result<()> {
        let status = match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, message),
            None => message.to_string(),
        };
        self.control_plane
            .report_job_status(&self.ref_id, &status)
            .await
    }
}
