//! Client side of the remote control plane.
//!
//! All calls are best-effort: callers log failures and carry on.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ControlPlaneConfig;
use crate::error::{AgentError, Result};

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Report printer liveness (e.g. "online") with a last-seen timestamp.
    async fn report_status(&self, node_id: &str, status: &str, last_seen: DateTime<Utc>)
        -> Result<()>;

    /// Report the node's newly discovered public URL.
    async fn report_url(&self, node_id: &str, url: &str) -> Result<()>;

    /// Report a free-text status/progress string for a job reference id.
    async fn report_job_status(&self, ref_id: &str, status: &str) -> Result<()>;

    /// The printer an operator selected for this node, if any.
    async fn selected_printer(&self, node_id: &str) -> Result<Option<String>>;

    /// Report the names of the printers installed on this node.
    async fn report_printers(&self, node_id: &str, printers: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SelectedPrinter {
    #[serde(default)]
    selected_printer: Option<String>,
}

#[derive(Debug, Serialize)]
struct PrinterList<'a> {
    list_printers: &'a [String],
}

/// Form-encoded HTTP implementation.
#[derive(Clone)]
pub struct HttpControlPlane {
    base: String,
    client: Client,
    last_seen_offset: FixedOffset,
}

impl HttpControlPlane {
    /// # Errors
    ///
    /// Fails if the offset is out of range or the HTTP client cannot be built.
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let last_seen_offset = config
            .last_seen_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "invalid last_seen offset: {} hours",
                    config.last_seen_utc_offset_hours
                ))
            })?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            base: config.base_url.trim_end_matches('/').to_string(),
            client,
            last_seen_offset,
        })
    }

    async fn post_form(&self, op: &str, url: String, form: &[(&str, &str)]) -> Result<()> {
        let resp = self.client.post(&url).form(form).send().await?;
        Self::check(op, resp).await.map(|_| ())
    }

    /// Pass a 2xx response through; anything else becomes an error carrying
    /// the status and body.
    async fn check(op: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(op, %status, "Control plane call succeeded");
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(AgentError::ControlPlane(format!(
                "{} failed {} {}",
                op, status, body
            )))
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn report_status(
        &self,
        node_id: &str,
        status: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let url = format!("{}/update_printer_status/{}", self.base, node_id);
        let last_seen = format_last_seen(last_seen, self.last_seen_offset);
        self.post_form(
            "update_printer_status",
            url,
            &[("status", status), ("last_seen", last_seen.as_str())],
        )
        .await
    }

    async fn report_url(&self, node_id: &str, url: &str) -> Result<()> {
        let endpoint = format!("{}/update_printer_url", self.base);
        self.post_form(
            "update_printer_url",
            endpoint,
            &[("printer_id", node_id), ("url", url)],
        )
        .await
    }

    async fn report_job_status(&self, ref_id: &str, status: &str) -> Result<()> {
        let url = format!("{}/update_status/{}", self.base, ref_id);
        self.post_form("update_status", url, &[("status", status)])
            .await
    }

    async fn selected_printer(&self, node_id: &str) -> Result<Option<String>> {
        let url = format!("{}/get_printer_name/{}", self.base, node_id);
        let resp = Self::check("get_printer_name", self.client.get(&url).send().await?).await?;
        let body: SelectedPrinter = resp.json().await?;
        Ok(body
            .selected_printer
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()))
    }

    async fn report_printers(&self, node_id: &str, printers: &[String]) -> Result<()> {
        let url = format!("{}/update_printer_name/{}", self.base, node_id);
        let resp = self
            .client
            .post(&url)
            .json(&PrinterList {
                list_printers: printers,
            })
            .send()
            .await?;
        Self::check("update_printer_name", resp).await.map(|_| ())
    }
}

/// `YYYY-MM-DD HH:MM:SS` in the control plane's local offset.
pub fn format_last_seen(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_seen_uses_offset() {
        let ts = DateTime::parse_from_rfc3339("2025-09-04T20:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        assert_eq!(format_last_seen(ts, offset), "2025-09-05 03:30:05");
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let cfg = ControlPlaneConfig {
            base_url: "https://cp.example.com/".to_string(),
            ..ControlPlaneConfig::default()
        };
        let cp = HttpControlPlane::new(&cfg).unwrap();
        assert_eq!(cp.base, "https://cp.example.com");
    }

    #[test]
    fn overflowing_offset_rejected() {
        let cfg = ControlPlaneConfig {
            last_seen_utc_offset_hours: i32::MAX,
            ..ControlPlaneConfig::default()
        };
        assert!(matches!(
            HttpControlPlane::new(&cfg),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn out_of_range_offset_rejected() {
        let cfg = ControlPlaneConfig {
            last_seen_utc_offset_hours: 30,
            ..ControlPlaneConfig::default()
        };
        assert!(matches!(
            HttpControlPlane::new(&cfg),
            Err(AgentError::Config(_))
        ));
    }
}
