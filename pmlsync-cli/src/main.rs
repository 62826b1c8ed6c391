//! pmlsync CLI: download, merge and publish day-ahead PML reports.
//!
//! Commands:
//! - `run`: export all subsystems from the portal, validate, normalize, publish
//! - `fetch`: export only; leaves one CSV per subsystem in the working directory
//! - `process`: validate, normalize and publish artifacts already on disk
//! - `clean`: delete the per-subsystem artifacts

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pmlsync_core::portal::HttpPortal;
use pmlsync_core::publish::HttpIngestSink;
use pmlsync_runner::{
    clean, export_phase, process_existing, run_pipeline, PipelineConfig, PipelineError,
    PipelineReport,
};

#[derive(Parser)]
#[command(
    name = "pmlsync",
    about = "pmlsync: CENACE day-ahead PML scraper and ingestion client"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a TOML config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for downloaded artifacts (overrides the config file).
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,

    /// Records per ingestion request (overrides the config file).
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Ingestion API base URL (overrides the config file).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log filter, e.g. `info` or `pmlsync_core=debug`. Falls back to RUST_LOG, then `info`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export, validate, normalize and publish.
    Run,
    /// Export only: download and extract every subsystem's report.
    Fetch,
    /// Validate, normalize and publish artifacts already in the working directory.
    Process,
    /// Delete the per-subsystem artifacts from the working directory.
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    init_logging(&cli.global, &config)?;

    match cli.command {
        Commands::Run => cmd_run(&config),
        Commands::Fetch => cmd_fetch(&config),
        Commands::Process => cmd_process(&config),
        Commands::Clean => cmd_clean(&config),
    }
}

fn load_config(args: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.working_dir {
        config.artifacts.working_dir = dir.clone();
    }
    if let Some(size) = args.batch_size {
        config.ingest.batch_size = size;
    }
    if let Some(url) = &args.base_url {
        config.ingest.base_url = url.clone();
    }
    if let Some(file) = &args.log_file {
        config.log_file = Some(file.clone());
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(args: &GlobalArgs, config: &PipelineConfig) -> Result<()> {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow!(e))
}

// ── Commands ─────────────────────────────────────────────────────────

fn cmd_run(config: &PipelineConfig) -> Result<()> {
    info!("starting PML MDA run");
    let portal = HttpPortal::new(&config.portal.http)?;
    let sink = HttpIngestSink::new(&config.ingest)?;
    info!(endpoint = %sink.endpoint(), "ingestion endpoint");

    let report = run_pipeline(config, &portal, &sink).map_err(logged)?;
    finish(&report)
}

fn cmd_fetch(config: &PipelineConfig) -> Result<()> {
    let portal = HttpPortal::new(&config.portal.http)?;
    let summary = export_phase(config, &portal).map_err(logged)?;

    for artifact in summary.artifacts() {
        println!("{}  {}", artifact.subsystem, artifact.path.display());
    }
    if !summary.all_succeeded() {
        bail!(
            "{} of {} subsystems failed to export",
            summary.failed(),
            summary.outcomes.len()
        );
    }
    Ok(())
}

fn cmd_process(config: &PipelineConfig) -> Result<()> {
    let sink = HttpIngestSink::new(&config.ingest)?;
    let report = process_existing(config, &sink).map_err(logged)?;
    finish(&report)
}

fn cmd_clean(config: &PipelineConfig) -> Result<()> {
    let removed = clean(config)?;
    if removed.is_empty() {
        println!(
            "No artifacts with prefix '{}' in {}",
            config.artifacts.prefix,
            config.artifacts.working_dir.display()
        );
    }
    for path in removed {
        println!("removed {}", path.display());
    }
    Ok(())
}

/// Send a fatal pipeline error to the log stream before it reaches stderr.
fn logged(e: PipelineError) -> PipelineError {
    error!("{e}");
    e
}

fn finish(report: &PipelineReport) -> Result<()> {
    let publish = &report.publish;
    println!(
        "Sent {}/{} records in {} batches",
        publish.records_sent,
        publish.total_records,
        publish.batches.len()
    );
    if let Some(path) = &report.combined_csv {
        println!("Combined table: {}", path.display());
    }
    if !report.succeeded() {
        let failed: Vec<String> = publish
            .failed_batches()
            .map(|b| b.index.to_string())
            .collect();
        bail!("publish incomplete: batches {} failed", failed.join(", "));
    }
    Ok(())
}
