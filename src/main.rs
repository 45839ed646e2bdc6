//! News Pipeline
//! One scheduled run: fetch → normalize → deduplicate → enrich → persist
//!
//! Usage:
//!   pipeline <SOURCE_COUNT> <MODE> [--config PATH] [--output summary|json]
//!
//! `SOURCE_COUNT` is `all` or a positive number of configured sources.
//! The exit code is 0 unless the run failed before processing any source.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use news_pipeline::config::{Config, RunMode, SourceCount};
use news_pipeline::pipeline::{Pipeline, RunSummary};

/// News Pipeline - ingestion with LLM enrichment
#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(author = "NEURO Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetches news, enriches it with LLM summaries and stores it idempotently")]
struct Cli {
    /// Number of configured sources to process ("all" or N)
    source_count: SourceCount,

    /// Run mode
    #[arg(value_enum)]
    mode: RunMode,

    /// Config file (defaults to ./pipeline.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format for the run summary
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // logs go to stderr, the summary owns stdout
    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Sets the stop flag on SIGTERM/SIGINT; in-flight articles finish first
async fn shutdown_signal(stop: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, finishing in-flight articles...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, finishing in-flight articles...");
        }
    }

    stop.store(true, Ordering::SeqCst);
}

async fn execute(cli: &Cli, run_id: &str) -> RunSummary {
    let started_at = Utc::now();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration invalid");
            return RunSummary::failed(run_id, cli.mode, started_at, e);
        }
    };
    info!(
        sources = config.enabled_sources().count(),
        credentials = config.credential_count(),
        max_concurrency = config.max_concurrency,
        "Configuration loaded"
    );

    let mut pipeline = match Pipeline::from_config(&config, cli.source_count, cli.mode, run_id).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Pipeline setup failed");
            return RunSummary::failed(run_id, cli.mode, started_at, e);
        }
    };

    let signals = tokio::spawn(shutdown_signal(pipeline.control().stop_handle()));
    let summary = pipeline.run().await;
    signals.abort();
    summary
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    let run_id = uuid::Uuid::new_v4().to_string();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        run_id = %run_id,
        mode = ?cli.mode,
        "Starting news pipeline"
    );

    let span = tracing::info_span!("run", run_id = %run_id);
    let summary = execute(&cli, &run_id).instrument(span).await;

    match cli.output {
        OutputFormat::Json => println!("{}", summary.to_json()?),
        OutputFormat::Summary => print!("{}", summary.render_table()),
    }

    info!(status = summary.status.as_str(), "News pipeline stopped");
    Ok(ExitCode::from(summary.status.exit_code()))
}
