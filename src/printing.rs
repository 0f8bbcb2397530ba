//! Submitting print requests and following them to completion.
//!
//! A [`PrintService`] turns a [`PrintRequest`] into a spooler submission and
//! hands the resulting job to a [`JobWatcher`]. Batches run one file at a
//! time; a file that cannot be found or submitted is reported and skipped.
//!
//! # Printer choice
//!
//! ```text
//! explicit name ─► operator selection (control plane) ─► spooler default
//!               ─► first installed printer ─► "PDF"
//! ```

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::control_plane::ControlPlane;
use crate::error::{AgentError, Result};
use crate::spooler::{JobOptions, PrinterInfo, Spooler};
use crate::watcher::sink::{self, ControlPlaneSink, UpdateSink};
use crate::watcher::{JobWatcher, WatchOutcome};

const ALL_PAGES: &str = "all";
const FALLBACK_PRINTER: &str = "PDF";
const UPLOAD_DIR: &str = "pdfs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorMode {
    Gray,
    Rgb,
}

impl ColorMode {
    /// Map a loose color name to a mode. Anything not recognisably
    /// monochrome prints in color; an empty name prints gray.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "bw" | "black" | "gray" | "grey" | "kgray" | "grayscale" => ColorMode::Gray,
            _ => ColorMode::Rgb,
        }
    }

    /// Value of the `ColorModel` job option.
    pub fn as_cups(&self) -> &'static str {
        match self {
            ColorMode::Gray => "Gray",
            ColorMode::Rgb => "RGB",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cups())
    }
}

/// One file to print and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintRequest {
    pub file: PathBuf,
    /// `all` or a page-range expression such as `1-3,5`
    pub pages: String,
    pub color: ColorMode,
    pub copies: u32,
}

impl PrintRequest {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            pages: ALL_PAGES.to_string(),
            color: ColorMode::Gray,
            copies: 1,
        }
    }

    pub fn pages(mut self, pages: impl Into<String>) -> Self {
        self.pages = pages.into().trim().to_ascii_lowercase();
        self
    }

    pub fn color(mut self, color: ColorMode) -> Self {
        self.color = color;
        self
    }

    pub fn copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    pub fn options(&self) -> JobOptions {
        let mut options = JobOptions::new();
        options.insert("ColorModel".to_string(), self.color.as_cups().to_string());
        options.insert("copies".to_string(), self.copies.to_string());
        if !self.pages.is_empty() && self.pages != ALL_PAGES {
            options.insert("page-ranges".to_string(), self.pages.clone());
        }
        options
    }
}

/// Locate `name`.
///
/// An existing absolute path is used as is. Otherwise the first search
/// directory containing `name` wins. Failing that, the most recently
/// modified file in any search directory whose name ends with `name`
/// (case-insensitive) is used, which finds uploads saved as
/// `<timestamp>_<name>`.
pub fn resolve_file(name: &Path, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.is_absolute() {
        return name.exists().then(|| name.to_path_buf());
    }
    search_dirs
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .or_else(|| newest_with_suffix(name, search_dirs))
}

fn newest_with_suffix(name: &Path, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.components().count() != 1 {
        return None;
    }
    let target = name.to_string_lossy().trim().to_lowercase();
    if target.is_empty() {
        return None;
    }

    search_dirs
        .iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flatten()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(&target)
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((meta.modified().ok()?, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Where uploads land: `<base>/pdfs/<line_id>`, then `<base>/pdfs`, then
/// `<base>` itself.
pub fn default_search_dirs(base: &Path, line_id: Option<&str>) -> Vec<PathBuf> {
    let uploads = base.join(UPLOAD_DIR);
    let mut dirs = Vec::with_capacity(3);
    if let Some(line_id) = line_id.map(str::trim).filter(|id| !id.is_empty()) {
        dirs.push(uploads.join(line_id));
    }
    dirs.push(uploads);
    dirs.push(base.to_path_buf());
    dirs
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Result of one file in a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub file: PathBuf,
    pub result: Result<WatchOutcome>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }
}

/// The node's link to the control plane.
struct Remote {
    control_plane: Arc<dyn ControlPlane>,
    node_id: String,
}

pub struct PrintService {
    spooler: Arc<dyn Spooler>,
    watcher: JobWatcher,
    search_dirs: Vec<PathBuf>,
    remote: Option<Remote>,
}

impl PrintService {
    pub fn new(spooler: Arc<dyn Spooler>, watcher: JobWatcher) -> Self {
        Self {
            spooler,
            watcher,
            search_dirs: Vec::new(),
            remote: None,
        }
    }

    /// Ask the control plane for the operator's printer choice and report
    /// installed printers under `node_id`.
    pub fn with_control_plane(
        mut self,
        control_plane: Arc<dyn ControlPlane>,
        node_id: impl Into<String>,
    ) -> Self {
        self.remote = Some(Remote {
            control_plane,
            node_id: node_id.into(),
        });
        self
    }

    /// Directories searched, in order, for relative file names.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = dirs;
        self
    }

    /// Pick the destination printer. Never fails: every lookup error is
    /// logged and the next source is tried, ending with `"PDF"`.
    pub async fn resolve_printer(&self, explicit: Option<&str>) -> String {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        if let Some(remote) = &self.remote {
            match remote.control_plane.selected_printer(&remote.node_id).await {
                Ok(Some(name)) => {
                    tracing::debug!(printer = %name, "Using printer selected on the control plane");
                    return name;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(node_id = %remote.node_id, error = %e, "Selected printer lookup failed");
                }
            }
        }

        match self.spooler.default_printer().await {
            Ok(Some(name)) => return name,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Default printer lookup failed"),
        }

        match self.spooler.list_printers().await {
            Ok(printers) => {
                if let Some(first) = printers.into_iter().next() {
                    return first.name;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Printer listing failed"),
        }

        tracing::warn!(printer = FALLBACK_PRINTER, "No printer found, using fallback");
        FALLBACK_PRINTER.to_string()
    }

    /// List installed printers and report their names to the control plane.
    /// A failed report is logged; the listing is still returned.
    pub async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        let printers = self.spooler.list_printers().await?;
        if let Some(remote) = &self.remote {
            let names: Vec<String> = printers.iter().map(|p| p.name.clone()).collect();
            match remote
                .control_plane
                .report_printers(&remote.node_id, &names)
                .await
            {
                Ok(()) => {
                    tracing::info!(node_id = %remote.node_id, count = names.len(), "Reported printer list")
                }
                Err(e) => {
                    tracing::warn!(node_id = %remote.node_id, error = %e, "Failed to report printer list")
                }
            }
        }
        Ok(printers)
    }

    /// Print `text` as a plain-text test page and watch it to the end.
    /// The temporary file is removed afterwards.
    pub async fn print_text(&self, printer: &str, text: &str, title: &str) -> Result<WatchOutcome> {
        let mut file = tempfile::Builder::new()
            .prefix("print-text-")
            .suffix(".txt")
            .tempfile()?;
        writeln!(file, "{}", text.trim_end())?;
        file.flush()?;

        let job_id = self
            .spooler
            .submit(printer, file.path(), title, &JobOptions::new())
            .await?;
        tracing::info!(printer, job_id, file = %file.path().display(), "Submitted text job");

        let result = self.watcher.watch(job_id, None).await;
        if let Err(e) = file.close() {
            tracing::warn!(error = %e, "Temp file cleanup failed");
        }
        result
    }

    fn locate(&self, file: &Path) -> Option<PathBuf> {
        if file.is_relative() && self.search_dirs.is_empty() {
            return file.exists().then(|| file.to_path_buf());
        }
        resolve_file(file, &self.search_dirs)
    }

    /// Submit one request to `printer` and watch the job to a terminal state.
    ///
    /// The submission and every watcher message go to `sink`. A missing
    /// file, a rejected submission or an abandoned watch is reported to
    /// `sink` as well before the error is returned.
    pub async fn submit_and_watch(
        &self,
        printer: &str,
        request: &PrintRequest,
        sink: Option<&dyn UpdateSink>,
    ) -> Result<WatchOutcome> {
        let Some(path) = self.locate(&request.file) else {
            let message = format!("file not found: {}", request.file.display());
            tracing::warn!(file = %request.file.display(), "File not found");
            sink::notify(sink, &message).await;
            return Err(AgentError::Submit(message));
        };

        let name = display_name(&path);
        let title = format!("Print {}", name);
        let job_id = match self
            .spooler
            .submit(printer, &path, &title, &request.options())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(printer, file = %name, error = %e, "Submit failed");
                sink::notify(sink, &format!("submit failed: {} | {}", name, e)).await;
                return Err(e);
            }
        };

        let message = format!(
            "submitted #{} | file={} | pages={} | copies={} | color={}",
            job_id, name, request.pages, request.copies, request.color
        );
        tracing::info!(printer, job_id, "{}", message);
        sink::notify(sink, &message).await;

        match self.watcher.watch(job_id, sink).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                sink::notify(sink, &format!("[JOB {}] watch abandoned: {}", job_id, e)).await;
                Err(e)
            }
        }
    }

    /// Print `requests` one after another.
    ///
    /// With a `status` sink, every message is forwarded prefixed with
    /// `file i/n`, followed by a final "all files processed" status.
    pub async fn print_batch(
        &self,
        printer: &str,
        requests: &[PrintRequest],
        status: Option<&ControlPlaneSink>,
    ) -> BatchReport {
        let total = requests.len();
        let mut report = BatchReport::default();

        if total == 0 {
            tracing::info!("Print batch is empty");
            sink::notify(status.map(|s| s as &dyn UpdateSink), "no jobs in batch").await;
            return report;
        }

        for (idx, request) in requests.iter().enumerate() {
            let file_sink = status.map(|s| {
                s.clone()
                    .with_prefix(format!("file {}/{}", idx + 1, total))
            });
            let result = self
                .submit_and_watch(
                    printer,
                    request,
                    file_sink.as_ref().map(|s| s as &dyn UpdateSink),
                )
                .await;
            report.items.push(BatchItem {
                file: request.file.clone(),
                result,
            });
        }

        let summary = format!(
            "all files processed ({} job{})",
            total,
            if total > 1 { "s" } else { "" }
        );
        tracing::info!(printer, succeeded = report.succeeded(), total, "{}", summary);
        sink::notify(status.map(|s| s as &dyn UpdateSink), &summary).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn color_names_map_to_models() {
        for gray in ["bw", "Black", " GREY ", "kgray", "grayscale", ""] {
            assert_eq!(ColorMode::parse(gray), ColorMode::Gray, "{gray:?}");
        }
        assert_eq!(ColorMode::parse("color"), ColorMode::Rgb);
        assert_eq!(ColorMode::parse("cmyk"), ColorMode::Rgb);
    }

    #[test]
    fn options_omit_page_ranges_for_all() {
        let options = PrintRequest::new("a.pdf").options();
        assert_eq!(options.get("ColorModel").map(String::as_str), Some("Gray"));
        assert_eq!(options.get("copies").map(String::as_str), Some("1"));
        assert!(!options.contains_key("page-ranges"));
    }

    #[test]
    fn options_carry_page_ranges_and_copies() {
        let options = PrintRequest::new("a.pdf")
            .pages(" 1-3 ")
            .color(ColorMode::Rgb)
            .copies(2)
            .options();
        assert_eq!(options.get("page-ranges").map(String::as_str), Some("1-3"));
        assert_eq!(options.get("ColorModel").map(String::as_str), Some("RGB"));
        assert_eq!(options.get("copies").map(String::as_str), Some("2"));
    }

    #[test]
    fn resolves_first_matching_search_dir() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(second.path().join("doc.pdf"), b"%PDF").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            resolve_file(Path::new("doc.pdf"), &dirs),
            Some(second.path().join("doc.pdf"))
        );
        assert_eq!(resolve_file(Path::new("missing.pdf"), &dirs), None);
    }

    #[test]
    fn suffix_match_picks_newest_upload() {
        use std::time::{Duration, SystemTime};

        let dir = TempDir::new().unwrap();
        let older = dir.path().join("1725430000_Report.pdf");
        let newer = dir.path().join("1725439999_report.pdf");
        for (path, age) in [(&older, 600), (&newer, 60)] {
            let file = std::fs::File::create(path).unwrap();
            file.set_modified(SystemTime::now() - Duration::from_secs(age))
                .unwrap();
        }
        std::fs::write(dir.path().join("report.pdf.bak"), b"x").unwrap();

        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(resolve_file(Path::new("report.pdf"), &dirs), Some(newer));
    }

    #[test]
    fn exact_match_beats_suffix_match() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1725439999_doc.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("doc.pdf"), b"%PDF").unwrap();

        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(
            resolve_file(Path::new("doc.pdf"), &dirs),
            Some(dir.path().join("doc.pdf"))
        );
    }

    #[test]
    fn default_dirs_put_line_folder_first() {
        let base = Path::new("/srv/node");
        assert_eq!(
            default_search_dirs(base, Some("U123")),
            vec![
                PathBuf::from("/srv/node/pdfs/U123"),
                PathBuf::from("/srv/node/pdfs"),
                PathBuf::from("/srv/node"),
            ]
        );
        assert_eq!(
            default_search_dirs(base, Some("  ")),
            vec![PathBuf::from("/srv/node/pdfs"), PathBuf::from("/srv/node")]
        );
    }

    #[test]
    fn absolute_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        assert_eq!(resolve_file(&path, &[]), None);
        std::fs::write(&path, b"%PDF").unwrap();
        assert_eq!(resolve_file(&path, &[]), Some(path));
    }
}
