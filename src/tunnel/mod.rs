//! Reverse-tunnel management.
//!
//! The node has no inbound address, so it keeps an outbound tunnel open
//! through one of several providers and reports the public URL each
//! provider announces.
//!
//! # Components
//!
//! - [`SessionRunner`]: spawns one provider process, streams its combined
//!   output, and reports every announced URL
//! - [`TunnelSupervisor`]: restart policy across runs (backoff, failover)
//! - [`Backoff`]: exponential restart delay with jitter
//!
//! # Policy
//!
//! ```text
//! run_once(provider[i])
//!   ├─ Disconnected (URL was seen) ─► reset backoff, retry provider[i]
//!   └─ NoUrl / SpawnFailed         ─► grow backoff, move to provider[i+1]
//! ```

pub mod backoff;
pub mod session;
pub mod supervisor;

use regex::Regex;

pub use backoff::Backoff;
pub use session::{RunOutcome, SessionRunner, TunnelRunner, TunnelSession};
pub use supervisor::TunnelSupervisor;

/// First URL in `line` matching the provider pattern.
pub fn extract_url<'a>(pattern: &Regex, line: &'a str) -> Option<&'a str> {
    pattern.find(line).map(|m| m.as_str())
}
