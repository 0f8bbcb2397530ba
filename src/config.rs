use std::time::Duration;

use regex::{Regex, RegexBuilder};

use crate::error::{AgentError, Result};

/// Placeholder substituted with the local listen port in provider arguments.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Upper bound accepted for the backoff cap and the jitter.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// A reverse-tunnel provider: how to spawn it and how to spot its public URL.
#[derive(Debug, Clone)]
pub struct TunnelProviderSpec {
    /// Short name used in logs (e.g. "serveo")
    pub name: String,
    /// Executable to spawn
    pub program: String,
    /// Arguments; any `{port}` is replaced with the listen port
    pub args: Vec<String>,
    /// Regular expression matched (case-insensitively) against each output line
    pub url_pattern: String,
}

impl TunnelProviderSpec {
    pub fn new(name: &str, program: &str, args: &[&str], url_pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            url_pattern: url_pattern.to_string(),
        }
    }

    /// SSH reverse forward through serveo.net.
    pub fn serveo() -> Self {
        Self::new(
            "serveo",
            "ssh",
            &[
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ExitOnForwardFailure=yes",
                "-R",
                "80:localhost:{port}",
                "serveo.net",
                "-p",
                "22",
            ],
            r"https://[a-zA-Z0-9.-]+\.serveo\.net",
        )
    }

    /// Cloudflare quick tunnel.
    pub fn cloudflare() -> Self {
        Self::new(
            "cloudflare",
            "cloudflared",
            &[
                "tunnel",
                "--url",
                "http://localhost:{port}",
                "--no-autoupdate",
            ],
            r"https://[a-z0-9-]+\.trycloudflare\.com",
        )
    }

    /// Built-in provider by name (`serveo` or `cloudflare`).
    pub fn builtin(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "serveo" => Some(Self::serveo()),
            "cloudflare" | "cloudflared" => Some(Self::cloudflare()),
            _ => None,
        }
    }

    /// Arguments with the port placeholder filled in.
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|a| a.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    pub fn compile_pattern(&self) -> Result<Regex> {
        Ok(RegexBuilder::new(&self.url_pattern)
            .case_insensitive(true)
            .build()?)
    }
}

/// Where and how the node reports to the remote control plane.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Fixed UTC offset used when formatting `last_seen` timestamps
    pub last_seen_utc_offset_hours: i32,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            last_seen_utc_offset_hours: 7,
        }
    }
}

/// Immutable configuration resolved once at startup and handed to every
/// component at construction.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Use this node id instead of deriving one from hardware
    pub node_id_override: Option<String>,
    /// Local port exposed through the tunnel
    pub listen_port: u16,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    /// Upper bound of the random delay added to every tunnel restart
    pub backoff_jitter: Duration,
    pub stale_threshold_minutes: u32,
    pub heartbeat_interval: Duration,
    pub watch_poll_interval: Duration,
    /// Consecutive non-terminal query failures a watcher tolerates
    pub watch_max_transient_errors: u32,
    /// Tried in order; the first is preferred
    pub providers: Vec<TunnelProviderSpec>,
    pub control_plane: ControlPlaneConfig,
    /// Spooler server URI used for job attribute queries
    pub cups_server: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            node_id_override: None,
            listen_port: 8000,
            backoff_start: Duration::from_secs(5),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: Duration::from_secs(5),
            stale_threshold_minutes: 30,
            heartbeat_interval: Duration::from_secs(60),
            watch_poll_interval: Duration::from_millis(700),
            watch_max_transient_errors: 10,
            providers: vec![
                TunnelProviderSpec::serveo(),
                TunnelProviderSpec::cloudflare(),
            ],
            control_plane: ControlPlaneConfig::default(),
            cups_server: "ipp://localhost".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn new(listen_port: u16, control_plane_url: impl Into<String>) -> Self {
        Self {
            listen_port,
            control_plane: ControlPlaneConfig {
                base_url: control_plane_url.into(),
                ..ControlPlaneConfig::default()
            },
            ..Default::default()
        }
    }

    pub fn with_providers(mut self, providers: Vec<TunnelProviderSpec>) -> Self {
        self.providers = providers;
        self
    }

    /// Check the configuration is usable before any loop starts.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] for an empty provider list, an inverted
    /// backoff range, a backoff cap or jitter above [`MAX_BACKOFF`], or zero
    /// intervals, and [`AgentError::InvalidPattern`]
    /// when a provider pattern does not compile.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(AgentError::Config(
                "at least one tunnel provider is required".to_string(),
            ));
        }
        if self.backoff_start > self.backoff_max {
            return Err(AgentError::Config(format!(
                "backoff start {:?} exceeds backoff max {:?}",
                self.backoff_start, self.backoff_max
            )));
        }
        if self.backoff_max > MAX_BACKOFF || self.backoff_jitter > MAX_BACKOFF {
            return Err(AgentError::Config(format!(
                "backoff max {:?} and jitter {:?} must not exceed {:?}",
                self.backoff_max, self.backoff_jitter, MAX_BACKOFF
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(AgentError::Config(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.watch_poll_interval.is_zero() {
            return Err(AgentError::Config(
                "watch poll interval must be positive".to_string(),
            ));
        }
        for provider in &self.providers {
            provider.compile_pattern()?;
        }
        Ok(())
    }
}
