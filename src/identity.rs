//! Stable node identifier derived from host hardware.
//!
//! The id is `rpi-` followed by the last six hex digits of the primary MAC
//! address, matching how printer nodes are keyed in the control plane.

use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};

const ID_PREFIX: &str = "rpi-";
const SUFFIX_LEN: usize = 6;

/// Build a node id from a MAC address such as `b8:27:eb:cd:1e:e4`.
///
/// Returns `None` when the address has fewer than six hex digits or is all
/// zeros (as reported by virtual interfaces without hardware).
pub fn node_id_from_mac(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if hex.len() < SUFFIX_LEN || hex.chars().all(|c| c == '0') {
        return None;
    }
    Some(format!("{}{}", ID_PREFIX, &hex[hex.len() - SUFFIX_LEN..]))
}

/// Resolve this host's node id.
///
/// Reads interfaces under `/sys/class/net` in name order, skipping loopback,
/// and uses the first usable MAC. Falls back to `/etc/machine-id`.
///
/// # Errors
///
/// Returns [`AgentError::Config`] if neither source yields an identifier.
pub fn resolve() -> Result<String> {
    resolve_from(Path::new("/sys/class/net"), Path::new("/etc/machine-id"))
}

pub(crate) fn resolve_from(net_dir: &Path, machine_id: &Path) -> Result<String> {
    if let Ok(entries) = fs::read_dir(net_dir) {
        let mut names: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        names.sort();

        for name in names {
            let Ok(mac) = fs::read_to_string(net_dir.join(&name).join("address")) else {
                continue;
            };
            if let Some(id) = node_id_from_mac(mac.trim()) {
                tracing::debug!(interface = %name, node_id = %id, "Derived node id from MAC");
                return Ok(id);
            }
        }
    }

    let machine = fs::read_to_string(machine_id).map_err(|e| {
        AgentError::Config(format!(
            "no usable MAC address and {} unreadable: {}",
            machine_id.display(),
            e
        ))
    })?;
    let machine = machine.trim();
    let suffix = machine
        .len()
        .checked_sub(SUFFIX_LEN)
        .and_then(|start| machine.get(start..))
        .ok_or_else(|| AgentError::Config(format!("machine id too short: {:?}", machine)))?;
    Ok(format!("{}{}", ID_PREFIX, suffix))
}
