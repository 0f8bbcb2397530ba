use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::control_plane::ControlPlane;
use crate::stale::StaleQueueCanceller;

const ONLINE: &str = "online";

/// Periodically reports the node as online and sweeps stale print queues.
pub struct HeartbeatLoop {
    node_id: String,
    interval: Duration,
    threshold_minutes: u32,
    control_plane: Arc<dyn ControlPlane>,
    canceller: StaleQueueCanceller,
    clock: Arc<dyn Clock>,
}

impl HeartbeatLoop {
    pub fn new(
        node_id: impl Into<String>,
        interval: Duration,
        threshold_minutes: u32,
        control_plane: Arc<dyn ControlPlane>,
        canceller: StaleQueueCanceller,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            interval,
            threshold_minutes,
            control_plane,
            canceller,
            clock,
        }
    }

    /// Run until `token` is cancelled. The first beat happens immediately.
    pub async fn run(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.beat().await;
        }

        tracing::info!(node_id = %self.node_id, "Heartbeat loop stopped");
    }

    /// One cycle: report liveness, then check the queue. Neither step can
    /// fail the loop.
    pub async fn beat(&self) {
        let now = self.clock.now();
        match self
            .control_plane
            .report_status(&self.node_id, ONLINE, now)
            .await
        {
            Ok(()) => tracing::debug!(node_id = %self.node_id, "Reported online"),
            Err(e) => tracing::warn!(node_id = %self.node_id, error = %e, "Status report failed"),
        }

        if let Err(e) = self.canceller.check_and_cancel(self.threshold_minutes).await {
            tracing::warn!(error = %e, "Stale queue check failed");
        }
    }
}
