//! CLI entry point for the enricher tool.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use enricher_core::{EnrichConfig, Record, RunStatistics};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Records go to stdout, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EnrichConfig::default(),
    };
    args.apply_to(&mut config);
    config.validate().context("invalid configuration")?;
    debug!(?config, "configuration resolved");

    let Some(records) = read_records(&args)? else {
        info!("No input provided. Pass record JSON files or pipe a JSON array via stdin.");
        info!("Example: enricher records.json -o enriched.json");
        return Ok(());
    };
    info!(records = records.len(), "Enricher starting");

    let orchestrator = config
        .orchestrator()
        .context("failed to build the enrichment pipeline")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    if let Some(secs) = args.deadline_secs {
        spawn_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    let report = orchestrator.run(records, &cancel).await?;

    let json = serde_json::to_string_pretty(&report.records)
        .context("failed to serialize enriched records")?;
    match &args.output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    log_summary(&report.stats);
    Ok(())
}

fn load_config(path: &Path) -> Result<EnrichConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    EnrichConfig::from_json(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Reads records from the input files in order, or from piped stdin.
///
/// Returns `None` when there are no files and stdin is a terminal.
fn read_records(args: &Args) -> Result<Option<Vec<Record>>> {
    if !args.inputs.is_empty() {
        let mut records = Vec::new();
        for path in &args.inputs {
            if path.is_dir() {
                bail!("{} is a directory; expected a JSON file of records", path.display());
            }
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let batch = parse_records(&text)
                .with_context(|| format!("failed to parse records from {}", path.display()))?;
            debug!(path = %path.display(), records = batch.len(), "read input file");
            records.extend(batch);
        }
        return Ok(Some(records));
    }

    if io::stdin().is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    let records = parse_records(&buffer).context("failed to parse records from stdin")?;
    Ok(Some(records))
}

fn parse_records(text: &str) -> Result<Vec<Record>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight provider calls");
            cancel.cancel();
        }
    });
}

fn spawn_deadline(cancel: CancellationToken, deadline: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if !cancel.is_cancelled() {
            warn!(deadline_secs = deadline.as_secs(), "Deadline reached, cancelling remaining work");
            cancel.cancel();
        }
    });
}

fn log_summary(stats: &RunStatistics) {
    for (stage, stage_stats) in [("abstract", &stats.abstracts), ("pdf", &stats.pdfs)] {
        for (provider, count) in &stage_stats.succeeded {
            info!(stage, provider = %provider, count, "Found by provider");
        }
        info!(
            stage,
            attempted = stage_stats.attempted,
            skipped = stage_stats.skipped,
            found = stage_stats.total_succeeded(),
            not_found = stage_stats.not_found,
            cancelled = stage_stats.cancelled,
            failed = stage_stats.failed,
            "Stage summary"
        );
    }
    info!(
        input = stats.input_records,
        duplicates_removed = stats.duplicates_removed,
        "Enrichment complete"
    );
}
