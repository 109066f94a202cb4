use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use loadgate_core::runner::{RampMode, Stage};

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let d = humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m): {err}"))?;
    Ok(d)
}

/// `DURATION:TARGET`, e.g. `30s:50`.
fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 30s:50)"))?;
    let duration = parse_duration(duration)?;
    let target = target
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid stage target '{target}' (expected a non-negative integer)"))?;
    Ok(Stage { duration, target })
}

/// `NAME: VALUE`.
fn parse_header(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{input}' (expected NAME: VALUE)"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{input}' (empty name)"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_ramp(input: &str) -> Result<RampMode, String> {
    input
        .parse::<RampMode>()
        .map_err(|_| format!("invalid ramp '{input}' (expected stepped or linear)"))
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a human-readable summary.
    #[default]
    HumanReadable,
    /// Emit JSON progress lines and one summary line (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "loadgate",
    author,
    version,
    about = "Load generation with SLO verification",
    long_about = "loadgate drives a fixed or ramping number of virtual users against an HTTP endpoint for a bounded time, records per-request outcomes and latencies, and checks them against declared thresholds.\n\nA workload can be described in a YAML file, on the command line, or both (flags override file values).",
    after_help = "Examples:\n  loadgate init\n  loadgate run loadgate.yaml\n  loadgate run loadgate.yaml --vus 50 --duration 30s\n  loadgate run --url http://localhost:8081/health --vus 10 --duration 5s --check-status 200\n  loadgate run loadgate.yaml --threshold 'http_req_duration:p(95)<500' --output json"
)]
pub struct Cli {
    /// Log filter (overrides LOADGATE_LOG), e.g. debug or loadgate_core=trace
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a workload and evaluate its thresholds
    #[command(
        long_about = "Run a workload and evaluate its thresholds.\n\nValues come from command-line flags first, then the workload file, then built-in defaults."
    )]
    Run(Box<RunArgs>),

    /// Write a starter workload file
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Target directory (created if missing)
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Workload filename to create in the target directory
    #[arg(long, default_value = "loadgate.yaml")]
    pub file: String,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Path to a YAML workload file
    pub workload: Option<PathBuf>,

    /// Scenario name
    #[arg(long)]
    pub name: Option<String>,

    /// Target URL
    #[arg(long)]
    pub url: Option<String>,

    /// HTTP method
    #[arg(long, short = 'X')]
    pub method: Option<String>,

    /// Request header (repeatable, NAME: VALUE)
    #[arg(long = "header", short = 'H', value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Per-request timeout (e.g. 5s)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Total sends per request, including the first one
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Number of virtual users
    #[arg(long)]
    pub vus: Option<u64>,

    /// Test duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Shared iteration cap across all VUs
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Ramp stage (repeatable, DURATION:TARGET); replaces --vus
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// VUs at the start of a ramp
    #[arg(long)]
    pub start_vus: Option<u64>,

    /// How targets move between stages: stepped or linear
    #[arg(long, value_parser = parse_ramp)]
    pub ramp: Option<RampMode>,

    /// Delay between iterations of one VU
    #[arg(long, value_parser = parse_duration)]
    pub think_time: Option<Duration>,

    /// How long in-flight iterations may finish after the run stops
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Check that the response status equals this code (repeatable)
    #[arg(long = "check-status", value_name = "CODE")]
    pub check_status: Vec<u16>,

    /// Check that the response body contains this text (repeatable)
    #[arg(long = "check-body", value_name = "TEXT")]
    pub check_body: Vec<String>,

    /// Threshold (repeatable, METRIC:EXPR), e.g. 'http_req_duration:p(95)<500'
    #[arg(long = "threshold", value_name = "METRIC:EXPR")]
    pub thresholds: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
