use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::SupervisorConfig;
use crate::control_plane::{ControlPlane, HttpControlPlane};
use crate::error::Result;
use crate::heartbeat::HeartbeatLoop;
use crate::identity;
use crate::spooler::{CupsCli, Spooler};
use crate::stale::StaleQueueCanceller;
use crate::tunnel::{SessionRunner, TunnelRunner, TunnelSupervisor};
use crate::watcher::JobWatcher;

/// The node agent: owns the collaborators and runs the long-lived loops.
pub struct Agent {
    pub config: SupervisorConfig,
    pub node_id: String,
    spooler: Arc<dyn Spooler>,
    control_plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    runner: Option<Arc<dyn TunnelRunner>>,
}

impl Agent {
    /// Build an agent backed by the CUPS tools and the HTTP control plane.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, the node id cannot be
    /// resolved, or the HTTP client cannot be built.
    pub fn from_config(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let node_id = match &config.node_id_override {
            Some(id) => id.clone(),
            None => identity::resolve()?,
        };
        let spooler: Arc<dyn Spooler> = Arc::new(CupsCli::new(config.cups_server.clone()));
        let control_plane: Arc<dyn ControlPlane> =
            Arc::new(HttpControlPlane::new(&config.control_plane)?);
        Ok(Self::new(config, node_id, spooler, control_plane))
    }

    /// Build an agent over explicit collaborators. Tunnels are run as real
    /// provider processes unless [`Agent::with_runner`] replaces the runner.
    pub fn new(
        config: SupervisorConfig,
        node_id: impl Into<String>,
        spooler: Arc<dyn Spooler>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            spooler,
            control_plane,
            clock: Arc::new(SystemClock),
            runner: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn TunnelRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// The configured runner, or one spawning real provider processes.
    pub fn runner(&self) -> Arc<dyn TunnelRunner> {
        match &self.runner {
            Some(runner) => runner.clone(),
            None => Arc::new(
                SessionRunner::new(
                    self.node_id.clone(),
                    self.config.listen_port,
                    self.control_plane.clone(),
                )
                .with_clock(self.clock.clone()),
            ),
        }
    }

    pub fn spooler(&self) -> Arc<dyn Spooler> {
        self.spooler.clone()
    }

    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        self.control_plane.clone()
    }

    pub fn canceller(&self) -> StaleQueueCanceller {
        StaleQueueCanceller::new(self.spooler.clone(), self.clock.clone())
    }

    pub fn heartbeat(&self) -> HeartbeatLoop {
        HeartbeatLoop::new(
            self.node_id.clone(),
            self.config.heartbeat_interval,
            self.config.stale_threshold_minutes,
            self.control_plane.clone(),
            self.canceller(),
            self.clock.clone(),
        )
    }

    pub fn watcher(&self) -> JobWatcher {
        JobWatcher::from_config(self.spooler.clone(), &self.config)
    }

    /// Run the tunnel supervisor and the heartbeat loop concurrently until
    /// `token` is cancelled.
    ///
    /// Each loop runs in its own task. A loop that panics is logged and does
    /// not take the other one down; `run` returns once both have finished.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        tracing::info!(
            node_id = %self.node_id,
            port = self.config.listen_port,
            providers = ?self.config.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Starting node agent"
        );

        let heartbeat = self.heartbeat();
        let heartbeat_token = token.clone();
        let heartbeat_task = tokio::spawn(async move {
            heartbeat.run(heartbeat_token).await;
        });

        let tunnel = TunnelSupervisor::from_config(&self.config, self.runner());
        let tunnel_token = token.clone();
        let tunnel_task = tokio::spawn(async move {
            tunnel.run(tunnel_token).await;
        });

        let (heartbeat_done, tunnel_done) = tokio::join!(
            Self::join("heartbeat", heartbeat_task),
            Self::join("tunnel", tunnel_task)
        );
        if heartbeat_done && tunnel_done {
            tracing::info!(node_id = %self.node_id, "Node agent stopped");
        } else {
            tracing::warn!(node_id = %self.node_id, "Node agent stopped after a loop crashed");
        }
        Ok(())
    }

    /// Wait for a loop task; `false` if it panicked or was aborted.
    async fn join(name: &str, handle: JoinHandle<()>) -> bool {
        match handle.await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(task = name, error = %e, "Background loop crashed");
                false
            }
        }
    }
}
