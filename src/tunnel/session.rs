use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::TunnelProviderSpec;
use crate::control_plane::ControlPlane;
use crate::error::AgentError;
use crate::tunnel::extract_url;

/// How one tunnel run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The provider process could not be started
    SpawnFailed,
    /// The process ran and exited without ever announcing a URL
    NoUrl,
    /// A URL was announced; the process has since exited or been stopped
    Disconnected { url: String },
}

impl RunOutcome {
    pub fn found_url(&self) -> bool {
        matches!(self, RunOutcome::Disconnected { .. })
    }
}

/// Runs one provider process to completion.
#[async_trait]
pub trait TunnelRunner: Send + Sync {
    async fn run_once(&self, provider: &TunnelProviderSpec, token: &CancellationToken)
        -> RunOutcome;
}

/// A live provider process. Owned by the runner for the process lifetime.
pub struct TunnelSession {
    pub provider: String,
    pub discovered_url: Option<String>,
    pub started_at: DateTime<Utc>,
    child: Child,
}

impl TunnelSession {
    /// Stop the process if it is still running and reap it.
    async fn shutdown(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(provider = %self.provider, %status, "Tunnel process exited");
            }
            _ => {
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(provider = %self.provider, error = %e, "Failed to stop tunnel process");
                }
            }
        }
    }
}

enum Source {
    Stdout,
    Stderr,
}

/// Spawns provider processes and reports the URLs they announce.
pub struct SessionRunner {
    node_id: String,
    port: u16,
    control_plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
}

impl SessionRunner {
    pub fn new(node_id: impl Into<String>, port: u16, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            node_id: node_id.into(),
            port,
            control_plane,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to stamp session start and uptime.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn spawn(&self, provider: &TunnelProviderSpec) -> Result<TunnelSession, AgentError> {
        let child = Command::new(&provider.program)
            .args(provider.args_for_port(self.port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                provider: provider.name.clone(),
                source,
            })?;

        Ok(TunnelSession {
            provider: provider.name.clone(),
            discovered_url: None,
            started_at: self.clock.now(),
            child,
        })
    }

    async fn handle_line(&self, session: &mut TunnelSession, pattern: &Regex, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tracing::debug!(provider = %session.provider, "{}", line);

        let Some(url) = extract_url(pattern, line) else {
            return;
        };
        session.discovered_url = Some(url.to_string());
        match self.control_plane.report_url(&self.node_id, url).await {
            Ok(()) => {
                tracing::info!(provider = %session.provider, url, node_id = %self.node_id, "Updated public URL");
            }
            Err(e) => {
                tracing::warn!(provider = %session.provider, url, error = %e, "Failed to report public URL");
            }
        }
    }
}

#[async_trait]
impl TunnelRunner for SessionRunner {
    async fn run_once(
        &self,
        provider: &TunnelProviderSpec,
        token: &CancellationToken,
    ) -> RunOutcome {
        let pattern = match provider.compile_pattern() {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::error!(provider = %provider.name, error = %e, "Unusable URL pattern");
                return RunOutcome::SpawnFailed;
            }
        };

        tracing::info!(provider = %provider.name, node_id = %self.node_id, port = self.port, "Starting tunnel");
        let mut session = match self.spawn(provider) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Tunnel spawn failed");
                return RunOutcome::SpawnFailed;
            }
        };

        let mut stdout = session.child.stdout.take().map(|s| OutputLines::new(BufReader::new(s)));
        let mut stderr = session.child.stderr.take().map(|s| OutputLines::new(BufReader::new(s)));

        while stdout.is_some() || stderr.is_some() {
            let (source, line) = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(provider = %session.provider, "Stopping tunnel on shutdown");
                    break;
                }
                line = next_line(&mut stdout) => (Source::Stdout, line),
                line = next_line(&mut stderr) => (Source::Stderr, line),
            };

            match (source, line) {
                (_, Some(line)) => self.handle_line(&mut session, &pattern, &line).await,
                (Source::Stdout, None) => stdout = None,
                (Source::Stderr, None) => stderr = None,
            }
        }

        session.shutdown().await;
        let uptime = self.clock.now() - session.started_at;
        tracing::info!(
            provider = %session.provider,
            uptime_secs = uptime.num_seconds(),
            found_url = session.discovered_url.is_some(),
            "Tunnel session ended"
        );

        match session.discovered_url {
            Some(url) => RunOutcome::Disconnected { url },
            None => RunOutcome::NoUrl,
        }
    }
}

/// Line reader over provider output. Bytes that are not valid UTF-8 are
/// replaced rather than ending the stream, so the pipe stays drained.
struct OutputLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> OutputLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Cancel safe: a partially read line stays in the buffer and is
    /// completed by the next call.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Next line from an optional stream; `None` once it is closed or broken.
/// A missing stream never resolves.
async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<OutputLines<R>>) -> Option<String> {
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    match reader.next_line().await {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Error reading tunnel output");
            None
        }
    }
}
