use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use printer_node_agent::agent::Agent;
use printer_node_agent::clock::SystemClock;
use printer_node_agent::config::{ControlPlaneConfig, SupervisorConfig, TunnelProviderSpec};
use printer_node_agent::control_plane::{ControlPlane, HttpControlPlane};
use printer_node_agent::identity;
use printer_node_agent::printing::{default_search_dirs, ColorMode, PrintRequest, PrintService};
use printer_node_agent::queue::QueueEntry;
use printer_node_agent::shutdown::install_shutdown_handler;
use printer_node_agent::spooler::{CupsCli, PrinterInfo, Spooler};
use printer_node_agent::stale::{CancelReport, StaleCheck, StaleQueueCanceller};
use printer_node_agent::watcher::{ControlPlaneSink, JobWatcher, UpdateSink, WatchOutcome};

#[derive(Parser, Debug)]
#[command(name = "printer-node-agent")]
#[command(version)]
#[command(about = "Edge agent keeping a printer node reachable and supervising its print jobs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the agent: tunnel supervisor and heartbeat loop
    Run(RunArgs),

    /// Print this node's id
    Identity,

    /// Print queue commands
    Queue {
        #[command(flatten)]
        spooler: SpoolerArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Submit files to a printer and watch them to completion
    Print(PrintArgs),

    /// Print a short text as a test page and watch it
    PrintText(PrintTextArgs),

    /// Watch an already submitted job
    Watch(WatchArgs),

    /// List installed printers and report them to the control plane
    Printers(PrintersArgs),
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SpoolerArgs {
    /// Spooler server URI used for job queries
    #[arg(long, env = "CUPS_SERVER_URI", default_value = "ipp://localhost")]
    cups_server: String,
}

#[derive(Parser, Debug)]
struct ControlPlaneArgs {
    /// Base URL of the control plane
    #[arg(long, env = "CONTROL_PLANE_URL", default_value = "http://127.0.0.1:8080")]
    control_plane_url: String,

    /// Control plane request timeout in seconds
    #[arg(long, env = "CONTROL_PLANE_TIMEOUT_SECS", default_value = "10")]
    control_plane_timeout: u64,

    /// UTC offset (hours) used for last-seen timestamps
    #[arg(long, env = "LAST_SEEN_UTC_OFFSET", default_value = "7", allow_hyphen_values = true)]
    last_seen_offset: i32,
}

impl ControlPlaneArgs {
    fn config(&self) -> ControlPlaneConfig {
        ControlPlaneConfig {
            base_url: self.control_plane_url.clone(),
            request_timeout: Duration::from_secs(self.control_plane_timeout),
            last_seen_utc_offset_hours: self.last_seen_offset,
        }
    }

    fn client(&self) -> Result<Arc<dyn ControlPlane>, Box<dyn std::error::Error>> {
        Ok(Arc::new(HttpControlPlane::new(&self.config())?))
    }
}

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Node id used with the control plane (derived from the hardware when omitted)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,
}

impl NodeArgs {
    /// The node id, or `None` (logged) when it cannot be determined.
    fn resolve(&self) -> Option<String> {
        if let Some(id) = &self.node_id {
            return Some(id.clone());
        }
        match identity::resolve() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Node id unavailable, skipping control plane lookups");
                None
            }
        }
    }
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Node id to report under (derived from the hardware when omitted)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Local port exposed through the tunnel
    #[arg(long, env = "APP_PORT", default_value = "8000")]
    port: u16,

    /// Tunnel providers in preference order (comma-separated)
    #[arg(long, env = "TUNNEL_PROVIDERS", value_delimiter = ',', default_value = "serveo,cloudflare")]
    providers: Vec<String>,

    /// Initial tunnel restart delay in seconds
    #[arg(long, default_value = "5")]
    backoff_start: u64,

    /// Maximum tunnel restart delay in seconds
    #[arg(long, default_value = "60")]
    backoff_max: u64,

    /// Upper bound of the random restart jitter in seconds
    #[arg(long, default_value = "5")]
    backoff_jitter: u64,

    /// Heartbeat interval in seconds
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "60")]
    heartbeat_interval: u64,

    /// Age in minutes after which the whole queue is cancelled
    #[arg(long, env = "STALE_THRESHOLD_MINUTES", default_value = "30")]
    stale_minutes: u32,

    #[command(flatten)]
    control_plane: ControlPlaneArgs,

    #[command(flatten)]
    spooler: SpoolerArgs,
}

impl RunArgs {
    fn config(&self) -> Result<SupervisorConfig, Box<dyn std::error::Error>> {
        let providers = self
            .providers
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| {
                TunnelProviderSpec::builtin(name)
                    .ok_or_else(|| format!("unknown tunnel provider: {}", name))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SupervisorConfig {
            node_id_override: self.node_id.clone(),
            listen_port: self.port,
            backoff_start: Duration::from_secs(self.backoff_start),
            backoff_max: Duration::from_secs(self.backoff_max),
            backoff_jitter: Duration::from_secs(self.backoff_jitter),
            stale_threshold_minutes: self.stale_minutes,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            providers,
            control_plane: self.control_plane.config(),
            cups_server: self.spooler.cups_server.clone(),
            ..SupervisorConfig::default()
        })
    }
}

// =============================================================================
// Queue Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// List pending jobs with their age
    List,
    /// Cancel every pending job if the oldest has waited too long
    Check {
        /// Age threshold in minutes
        #[arg(long, env = "STALE_THRESHOLD_MINUTES", default_value = "30")]
        stale_minutes: u32,
    },
    /// Cancel every pending job now
    CancelAll,
}

// =============================================================================
// Print / Watch Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct PrintArgs {
    /// Files to print, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Destination printer (the system default when omitted)
    #[arg(long)]
    printer: Option<String>,

    /// Pages to print: "all" or a range such as "1-3,5"
    #[arg(long, default_value = "all")]
    pages: String,

    /// Color mode: bw/gray/grayscale for monochrome, anything else for color
    #[arg(long, default_value = "bw")]
    color: String,

    /// Number of copies
    #[arg(long, default_value = "1")]
    copies: u32,

    /// Directories searched for relative file names, before the upload folders
    #[arg(long = "search-dir")]
    search_dirs: Vec<PathBuf>,

    /// Upload folder (`pdfs/<line-id>`) searched first among the defaults
    #[arg(long)]
    line_id: Option<String>,

    /// Report progress to the control plane under this reference id
    #[arg(long)]
    ref_id: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "700")]
    poll_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    node: NodeArgs,

    #[command(flatten)]
    control_plane: ControlPlaneArgs,

    #[command(flatten)]
    spooler: SpoolerArgs,
}

#[derive(Parser, Debug)]
struct PrintTextArgs {
    /// Text to print
    text: String,

    /// Job title
    #[arg(long, default_value = "Text Print")]
    title: String,

    /// Destination printer (resolved like `print` when omitted)
    #[arg(long)]
    printer: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "700")]
    poll_ms: u64,

    #[command(flatten)]
    node: NodeArgs,

    #[command(flatten)]
    control_plane: ControlPlaneArgs,

    #[command(flatten)]
    spooler: SpoolerArgs,
}

#[derive(Parser, Debug)]
struct PrintersArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    node: NodeArgs,

    #[command(flatten)]
    control_plane: ControlPlaneArgs,

    #[command(flatten)]
    spooler: SpoolerArgs,
}

#[derive(Parser, Debug)]
struct WatchArgs {
    /// Spooler job id
    job_id: u32,

    /// Report progress to the control plane under this reference id
    #[arg(long)]
    ref_id: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "700")]
    poll_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    control_plane: ControlPlaneArgs,

    #[command(flatten)]
    spooler: SpoolerArgs,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct WatchOutput {
    job_id: u32,
    state: String,
    pages: Option<u32>,
    elapsed_secs: f64,
}

impl From<&WatchOutcome> for WatchOutput {
    fn from(outcome: &WatchOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            state: outcome.state.to_string(),
            pages: outcome.pages,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
        }
    }
}

#[derive(Serialize)]
struct PrintItemOutput {
    file: String,
    #[serde(flatten)]
    outcome: Option<WatchOutput>,
    error: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn run_agent(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config()?;
    let agent = Agent::from_config(config)?;
    let token = install_shutdown_handler()?;
    agent.run(token).await?;
    Ok(())
}

fn spooler(args: &SpoolerArgs) -> Arc<dyn Spooler> {
    Arc::new(CupsCli::new(args.cups_server.clone()))
}

fn print_service(
    spooler_args: &SpoolerArgs,
    control_plane: &ControlPlaneArgs,
    node: &NodeArgs,
    poll_ms: u64,
) -> Result<PrintService, Box<dyn std::error::Error>> {
    let spooler = spooler(spooler_args);
    let watcher = JobWatcher::new(spooler.clone(), Duration::from_millis(poll_ms));
    let service = PrintService::new(spooler, watcher);
    Ok(match node.resolve() {
        Some(node_id) => service.with_control_plane(control_plane.client()?, node_id),
        None => service,
    })
}

fn print_printers(printers: &[PrinterInfo]) {
    if printers.is_empty() {
        println!("No printers installed.");
        return;
    }
    println!("{:<28} {:<11} {:<10} REASONS", "PRINTER", "STATE", "ACCEPTING");
    println!("{}", "-".repeat(72));
    for printer in printers {
        let name = if printer.is_default {
            format!("{} (default)", printer.name)
        } else {
            printer.name.clone()
        };
        println!(
            "{:<28} {:<11} {:<10} {}",
            name,
            printer.state,
            if printer.accepting { "yes" } else { "no" },
            if printer.reasons.is_empty() {
                "none".to_string()
            } else {
                printer.reasons.join(", ")
            }
        );
    }
}

fn print_queue(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("No jobs in queue.");
        return;
    }
    println!(
        "{:<24} {:<12} {:>10} {:>10}  SUBMITTED",
        "JOB", "USER", "SIZE", "AGE(MIN)"
    );
    println!("{}", "-".repeat(90));
    for entry in entries {
        println!(
            "{:<24} {:<12} {:>10} {:>10}  {}",
            entry.job_name,
            entry.user.as_deref().unwrap_or("-"),
            entry
                .size_bytes
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry
                .age_minutes
                .map(|a| format!("{:.2}", a))
                .unwrap_or_else(|| "-".to_string()),
            entry.submitted_at_raw.as_deref().unwrap_or("-"),
        );
    }
}

fn print_cancel_report(report: &CancelReport) {
    println!(
        "Found {} job(s), cancelled {}, failed {}",
        report.found,
        report.canceled,
        report.errors.len()
    );
    for failure in &report.errors {
        println!("  {}: {}", failure.job, failure.error);
    }
}

async fn handle_queue(
    spooler_args: SpoolerArgs,
    output: OutputFormat,
    command: QueueCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let canceller = StaleQueueCanceller::new(spooler(&spooler_args), Arc::new(SystemClock));

    match command {
        QueueCommands::List => {
            let entries = canceller.snapshot().await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Table => print_queue(&entries),
            }
        }
        QueueCommands::Check { stale_minutes } => {
            let check = canceller.check_and_cancel(stale_minutes).await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&check)?),
                OutputFormat::Table => match &check {
                    StaleCheck::NoJobs => println!("No jobs in queue."),
                    StaleCheck::WithinThreshold { found, max_age } => println!(
                        "{} job(s) queued, oldest {:.2} min (threshold {} min)",
                        found, max_age, stale_minutes
                    ),
                    StaleCheck::Cancelled { max_age, report } => {
                        println!(
                            "Oldest job {:.2} min reached threshold {} min, queue cleared",
                            max_age, stale_minutes
                        );
                        print_cancel_report(report);
                    }
                },
            }
        }
        QueueCommands::CancelAll => {
            let report = canceller.cancel_all().await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Table => print_cancel_report(&report),
            }
        }
    }

    Ok(())
}

async fn handle_print(args: PrintArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut search_dirs = args.search_dirs.clone();
    search_dirs.extend(default_search_dirs(
        &std::env::current_dir()?,
        args.line_id.as_deref(),
    ));
    let service = print_service(&args.spooler, &args.control_plane, &args.node, args.poll_ms)?
        .with_search_dirs(search_dirs);
    let printer = service.resolve_printer(args.printer.as_deref()).await;

    let color = ColorMode::parse(&args.color);
    let requests: Vec<PrintRequest> = args
        .files
        .iter()
        .map(|file| {
            PrintRequest::new(file.clone())
                .pages(args.pages.clone())
                .color(color)
                .copies(args.copies)
        })
        .collect();

    let status = match &args.ref_id {
        Some(ref_id) => Some(ControlPlaneSink::new(args.control_plane.client()?, ref_id.clone())),
        None => None,
    };
    let report = service.print_batch(&printer, &requests, status.as_ref()).await;

    let items: Vec<PrintItemOutput> = report
        .items
        .iter()
        .map(|item| PrintItemOutput {
            file: item.file.display().to_string(),
            outcome: item.result.as_ref().ok().map(WatchOutput::from),
            error: item.result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Table => {
            println!("{:<40} {:<12} {:<8} {:>9}", "FILE", "STATE", "PAGES", "SECONDS");
            println!("{}", "-".repeat(72));
            for item in &items {
                match (&item.outcome, &item.error) {
                    (Some(outcome), _) => println!(
                        "{:<40} {:<12} {:<8} {:>9.2}",
                        item.file,
                        outcome.state,
                        outcome.pages.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        outcome.elapsed_secs
                    ),
                    (None, Some(error)) => println!("{:<40} error: {}", item.file, error),
                    (None, None) => {}
                }
            }
        }
    }

    if report.succeeded() < requests.len() {
        return Err(format!(
            "{} of {} file(s) failed",
            requests.len() - report.succeeded(),
            requests.len()
        )
        .into());
    }
    Ok(())
}

async fn handle_print_text(args: PrintTextArgs) -> Result<(), Box<dyn std::error::Error>> {
    let service = print_service(&args.spooler, &args.control_plane, &args.node, args.poll_ms)?;
    let printer = service.resolve_printer(args.printer.as_deref()).await;
    let outcome = service.print_text(&printer, &args.text, &args.title).await?;
    println!(
        "Text job {} on {} ended {} after {:.2}s",
        outcome.job_id,
        printer,
        outcome.state,
        outcome.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn handle_printers(args: PrintersArgs) -> Result<(), Box<dyn std::error::Error>> {
    let service = print_service(&args.spooler, &args.control_plane, &args.node, 700)?;
    let printers = service.list_printers().await?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&printers)?),
        OutputFormat::Table => print_printers(&printers),
    }
    Ok(())
}

async fn handle_watch(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let watcher = JobWatcher::new(spooler(&args.spooler), Duration::from_millis(args.poll_ms));

    let sink = match &args.ref_id {
        Some(ref_id) => Some(ControlPlaneSink::new(args.control_plane.client()?, ref_id.clone())),
        None => None,
    };
    let outcome = watcher
        .watch(args.job_id, sink.as_ref().map(|s| s as &dyn UpdateSink))
        .await?;

    let output = WatchOutput::from(&outcome);
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => println!(
            "Job {} ended {} after {:.2}s (pages={})",
            output.job_id,
            output.state,
            output.elapsed_secs,
            output.pages.unwrap_or(0)
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so table/JSON output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => {
            run_agent(run_args).await?;
        }
        Commands::Identity => {
            println!("{}", identity::resolve()?);
        }
        Commands::Queue {
            spooler,
            output,
            command,
        } => {
            handle_queue(spooler, output, command).await?;
        }
        Commands::Print(print_args) => {
            handle_print(print_args).await?;
        }
        Commands::PrintText(text_args) => {
            handle_print_text(text_args).await?;
        }
        Commands::Watch(watch_args) => {
            handle_watch(watch_args).await?;
        }
        Commands::Printers(printers_args) => {
            handle_printers(printers_args).await?;
        }
    }

    Ok(())
}
