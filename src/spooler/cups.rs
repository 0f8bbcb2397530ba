use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{AgentError, Result};
use crate::spooler::{JobAttributes, JobOptions, ListingOutput, PrinterInfo, PrinterState, Spooler};

const DEFAULT_SERVER: &str = "ipp://localhost";
const JOB_ATTRIBUTES_TEST: &str = "get-job-attributes.test";

/// Spooler adapter over the CUPS command-line tools (`lp`, `ipptool`,
/// `cancel`, `lpstat`).
///
/// Each call spawns a short-lived process and is self-contained, so one
/// instance can be shared freely between loops and watchers.
#[derive(Debug, Clone)]
pub struct CupsCli {
    server: String,
}

impl Default for CupsCli {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER)
    }
}

impl CupsCli {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    async fn run(program: &str, args: &[String]) -> std::io::Result<Output> {
        tracing::debug!(program, args = ?args, "Running spooler command");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).trim().to_string()
    }
}

#[async_trait]
impl Spooler for CupsCli {
    async fn submit(
        &self,
        printer: &str,
        file: &Path,
        title: &str,
        options: &JobOptions,
    ) -> Result<u32> {
        let mut args = vec![
            "-d".to_string(),
            printer.to_string(),
            "-t".to_string(),
            title.to_string(),
        ];
        for (key, value) in options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(file.display().to_string());

        let output = Self::run("lp", &args)
            .await
            .map_err(|e| AgentError::Submit(format!("failed to run lp: {}", e)))?;
        let stdout = Self::text(&output.stdout);
        if !output.status.success() {
            let stderr = Self::text(&output.stderr);
            return Err(AgentError::Submit(if stderr.is_empty() {
                format!("lp exited with {:?}", output.status.code())
            } else {
                stderr
            }));
        }

        parse_request_id(&stdout)
            .ok_or_else(|| AgentError::Submit(format!("unrecognised lp output: {}", stdout)))
    }

    async fn job_attributes(&self, job_id: u32) -> Result<JobAttributes> {
        let args = vec![
            "-tv".to_string(),
            "-d".to_string(),
            format!("job-id={}", job_id),
            format!("{}/jobs/{}", self.server, job_id),
            JOB_ATTRIBUTES_TEST.to_string(),
        ];
        let output = Self::run("ipptool", &args)
            .await
            .map_err(|e| AgentError::SpoolerQuery(format!("failed to run ipptool: {}", e)))?;

        let stdout = Self::text(&output.stdout);
        let stderr = Self::text(&output.stderr);
        if is_not_found(&stdout) || is_not_found(&stderr) {
            return Err(AgentError::JobNotFound(job_id));
        }

        match parse_job_attributes(&stdout) {
            Some(attrs) => Ok(attrs),
            None => Err(AgentError::SpoolerQuery(if stderr.is_empty() {
                format!("no job-state for job {}", job_id)
            } else {
                stderr
            })),
        }
    }

    async fn cancel(&self, job_name: &str) -> std::result::Result<(), String> {
        let output = Self::run("cancel", &[job_name.to_string()])
            .await
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = Self::text(&output.stderr);
        let stdout = Self::text(&output.stdout);
        Err(if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            "cancel failed".to_string()
        })
    }

    async fn list_pending(&self, printer: Option<&str>) -> Result<ListingOutput> {
        let mut args = vec!["-W".to_string(), "not-completed".to_string()];
        if let Some(printer) = printer {
            args.push("-o".to_string());
            args.push(printer.to_string());
        }

        let output = Self::run("lpstat", &args)
            .await
            .map_err(|e| AgentError::SpoolerQuery(format!("failed to run lpstat: {}", e)))?;

        Ok(ListingOutput {
            stdout: Self::text(&output.stdout),
            stderr: Self::text(&output.stderr),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn default_printer(&self) -> Result<Option<String>> {
        let output = Self::run("lpstat", &["-d".to_string()])
            .await
            .map_err(|e| AgentError::SpoolerQuery(format!("failed to run lpstat: {}", e)))?;
        Ok(parse_default_printer(&Self::text(&output.stdout)))
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        let status = Self::run("lpstat", &["-l".to_string(), "-p".to_string()])
            .await
            .map_err(|e| AgentError::SpoolerQuery(format!("failed to run lpstat: {}", e)))?;
        let stdout = Self::text(&status.stdout);
        if !status.status.success() && stdout.is_empty() {
            let stderr = Self::text(&status.stderr);
            if stderr.to_ascii_lowercase().contains("no destinations") {
                return Ok(Vec::new());
            }
            return Err(AgentError::SpoolerQuery(stderr));
        }

        let accepting = Self::run("lpstat", &["-a".to_string()])
            .await
            .map_err(|e| AgentError::SpoolerQuery(format!("failed to run lpstat: {}", e)))?;
        let accepting = parse_accepting(&Self::text(&accepting.stdout));
        let default = self.default_printer().await?;

        Ok(parse_printer_status(&stdout)
            .into_iter()
            .map(|(name, state, reasons)| PrinterInfo {
                accepting: accepting.contains(&name),
                is_default: default.as_deref() == Some(name.as_str()),
                name,
                state,
                reasons,
            })
            .collect())
    }
}

/// Parse `lpstat -l -p` into `(name, state, reasons)` per printer.
///
/// Each printer starts with a `printer <name> ...` line; its indented
/// `Alerts:` line carries the state reasons.
pub fn parse_printer_status(stdout: &str) -> Vec<(String, PrinterState, Vec<String>)> {
    let mut printers: Vec<(String, PrinterState, Vec<String>)> = Vec::new();

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("printer ") {
            let Some((name, status)) = rest.split_once(' ') else {
                continue;
            };
            let state = if status.starts_with("is idle") {
                PrinterState::Idle
            } else if status.starts_with("now printing") {
                PrinterState::Processing
            } else if status.starts_with("disabled") {
                PrinterState::Stopped
            } else {
                PrinterState::Unknown
            };
            printers.push((name.to_string(), state, Vec::new()));
        } else if let Some(alerts) = line.trim().strip_prefix("Alerts:") {
            if let Some((_, _, reasons)) = printers.last_mut() {
                *reasons = alerts
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|r| !r.is_empty() && *r != "none")
                    .map(str::to_string)
                    .collect();
            }
        }
    }

    printers
}

/// Names of destinations accepting jobs, from `lpstat -a`.
pub fn parse_accepting(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(' ')?;
            rest.starts_with("accepting requests").then(|| name.to_string())
        })
        .collect()
}

/// Extract the numeric job id from `lp` output such as
/// `request id is PDF-12 (1 file(s))`.
pub fn parse_request_id(stdout: &str) -> Option<u32> {
    let rest = stdout.split("request id is ").nth(1)?;
    let name = rest.split_whitespace().next()?;
    name.rsplit('-').next()?.parse().ok()
}

/// Parse `ipptool -tv` attribute lines into [`JobAttributes`].
pub fn parse_job_attributes(stdout: &str) -> Option<JobAttributes> {
    let mut state_code = None;
    let mut pages_completed = None;

    for line in stdout.lines() {
        let Some((lhs, value)) = line.trim().split_once(" = ") else {
            continue;
        };
        let name = lhs.split_whitespace().next().unwrap_or_default();
        let value = value.trim();
        match name {
            "job-state" => {
                state_code = value
                    .parse::<i32>()
                    .ok()
                    .or_else(|| job_state_keyword_code(value));
            }
            "job-media-sheets-completed" => {
                pages_completed = value.parse().ok();
            }
            _ => {}
        }
    }

    state_code.map(|state_code| JobAttributes {
        state_code,
        pages_completed,
    })
}

/// IPP keyword to `job-state` enum value.
pub fn job_state_keyword_code(keyword: &str) -> Option<i32> {
    match keyword {
        "pending" => Some(3),
        "pending-held" => Some(4),
        "processing" => Some(5),
        "processing-stopped" => Some(6),
        "canceled" | "cancelled" => Some(7),
        "aborted" => Some(8),
        "completed" => Some(9),
        _ => None,
    }
}

fn is_not_found(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("client-error-not-found") || lower.contains("job does not exist")
}

/// Parse `lpstat -d` output (`system default destination: PDF`).
pub fn parse_default_printer(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split_once("system default destination:"))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_from_lp_output() {
        assert_eq!(parse_request_id("request id is PDF-12 (1 file(s))"), Some(12));
        assert_eq!(
            parse_request_id("request id is HP_DeskJet-2-3045 (1 file(s))"),
            Some(3045)
        );
        assert_eq!(parse_request_id("lp: Error - no default destination"), None);
    }

    #[test]
    fn attributes_from_ipptool_keywords() {
        let out = r#""/usr/share/cups/ipptool/get-job-attributes.test":
    Get-Job-Attributes                                       [PASS]
        RECEIVED: 1024 bytes in response
        status-code = successful-ok (successful-ok)
        job-id (integer) = 12
        job-state (enum) = processing
        job-media-sheets-completed (integer) = 2
"#;
        assert_eq!(
            parse_job_attributes(out),
            Some(JobAttributes {
                state_code: 5,
                pages_completed: Some(2),
            })
        );
    }

    #[test]
    fn attributes_accept_numeric_state() {
        let out = "job-state (enum) = 9\n";
        assert_eq!(
            parse_job_attributes(out),
            Some(JobAttributes {
                state_code: 9,
                pages_completed: None,
            })
        );
    }

    #[test]
    fn attributes_missing_state() {
        assert_eq!(parse_job_attributes("status-code = successful-ok"), None);
    }

    #[test]
    fn not_found_detection() {
        assert!(is_not_found(
            "status-code = client-error-not-found (Job #99 does not exist.)"
        ));
        assert!(!is_not_found("status-code = successful-ok"));
    }

    #[test]
    fn keyword_codes() {
        assert_eq!(job_state_keyword_code("pending-held"), Some(4));
        assert_eq!(job_state_keyword_code("canceled"), Some(7));
        assert_eq!(job_state_keyword_code("bogus"), None);
    }

    #[test]
    fn printer_status_from_lpstat() {
        let out = "printer HP_LaserJet now printing HP_LaserJet-42.  enabled since Thu 04 Sep 2025 08:00:00 AM +07
\tForm mounts:
\tAlerts: none
\tDescription: Office laser
printer PDF is idle.  enabled since Thu 04 Sep 2025 07:00:00 AM +07
\tAlerts: none
printer Epson disabled since Thu 04 Sep 2025 06:00:00 AM +07 -
\tPaused
\tAlerts: media-empty-error, paused
";
        assert_eq!(
            parse_printer_status(out),
            vec![
                ("HP_LaserJet".to_string(), PrinterState::Processing, vec![]),
                ("PDF".to_string(), PrinterState::Idle, vec![]),
                (
                    "Epson".to_string(),
                    PrinterState::Stopped,
                    vec!["media-empty-error".to_string(), "paused".to_string()]
                ),
            ]
        );
    }

    #[test]
    fn accepting_from_lpstat() {
        let out = "PDF accepting requests since Thu 04 Sep 2025 07:00:00 AM +07
Epson not accepting requests since Thu 04 Sep 2025 06:00:00 AM +07 -
\tPaused";
        assert_eq!(parse_accepting(out), vec!["PDF".to_string()]);
    }

    #[test]
    fn default_printer_from_lpstat() {
        assert_eq!(
            parse_default_printer("system default destination: PDF").as_deref(),
            Some("PDF")
        );
        assert_eq!(parse_default_printer("no system default destination"), None);
    }
}
