use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{SupervisorConfig, TunnelProviderSpec};
use crate::shutdown::sleep_or_cancel;
use crate::tunnel::{Backoff, RunOutcome, TunnelRunner};

/// Keeps a tunnel up indefinitely, one provider process at a time.
///
/// Providers are tried in preference order. A run that announced a URL and
/// later dropped is retried on the same provider; a run that never produced
/// a URL moves on to the next provider (wrapping around).
pub struct TunnelSupervisor {
    providers: Vec<TunnelProviderSpec>,
    runner: Arc<dyn TunnelRunner>,
    backoff: Backoff,
}

impl TunnelSupervisor {
    pub fn new(
        providers: Vec<TunnelProviderSpec>,
        runner: Arc<dyn TunnelRunner>,
        backoff: Backoff,
    ) -> Self {
        Self {
            providers,
            runner,
            backoff,
        }
    }

    pub fn from_config(config: &SupervisorConfig, runner: Arc<dyn TunnelRunner>) -> Self {
        Self::new(config.providers.clone(), runner, Backoff::from_config(config))
    }

    /// Run until `token` is cancelled. Runs never overlap: the next process
    /// is spawned only after the previous one has been reaped.
    pub async fn run(mut self, token: CancellationToken) {
        if self.providers.is_empty() {
            tracing::error!("No tunnel providers configured, tunnel supervisor idle");
            return;
        }

        let mut index = 0;
        while !token.is_cancelled() {
            let provider = &self.providers[index];
            let outcome = self.runner.run_once(provider, &token).await;
            if token.is_cancelled() {
                break;
            }

            let name = provider.name.clone();
            let (delay, next) = self.next_step(index, &outcome);
            match &outcome {
                RunOutcome::Disconnected { url } => {
                    tracing::warn!(provider = %name, url = %url, delay = ?delay, "Tunnel ended, restarting same provider");
                }
                RunOutcome::NoUrl | RunOutcome::SpawnFailed => {
                    tracing::warn!(
                        provider = %name,
                        next_provider = %self.providers[next].name,
                        outcome = ?outcome,
                        delay = ?delay,
                        "Tunnel failed, switching provider"
                    );
                }
            }

            index = next;
            if !sleep_or_cancel(&token, delay).await {
                break;
            }
        }

        tracing::info!("Tunnel supervisor stopped");
    }

    /// Restart delay and provider index for the run after `outcome`.
    fn next_step(&mut self, index: usize, outcome: &RunOutcome) -> (Duration, usize) {
        if outcome.found_url() {
            self.backoff.reset();
            (self.backoff.next_delay(), index)
        } else {
            (self.backoff.next_delay(), (index + 1) % self.providers.len())
        }
    }
}
