//! rivven-pool - Elastic publisher pool runtime
//!
//! # Usage
//!
//! ```bash
//! # Forward stdin lines to stdout through the pool (default)
//! rivven-pool -c pool.yaml
//!
//! # Validate configuration
//! rivven-pool -c pool.yaml validate
//!
//! # Connect to the sink once
//! rivven-pool -c pool.yaml check
//! ```
//!
//! Logs go to stderr so they never mix with the records on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rivven_pool::connectors::StdoutSink;
use rivven_pool::{verify_sink, Pool, PoolConfig, Sink, WorkerMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "rivven-pool")]
#[command(version, about = "Elastic publisher pool for Rivven")]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read records from stdin, one per line, and publish them (default)
    Run,
    /// Validate configuration file
    Validate,
    /// Connect to the configured sink once
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PoolConfig::default()
            .normalized()
            .context("Invalid default configuration")?,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => validate_config(&config),
        Commands::Check => check_sink(&config).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(config: PoolConfig) -> Result<()> {
    info!("Starting rivven-pool");

    let pool = Pool::new(config, Arc::new(StdoutSink::new())).context("Failed to start pool")?;
    let enqueued = forward_lines(
        BufReader::new(tokio::io::stdin()),
        &pool,
        tokio::signal::ctrl_c(),
    )
    .await;
    info!(enqueued, "Stopped reading input");

    let status = pool.status();
    info!(
        buffered = status.buffered,
        live_workers = status.live_workers,
        "Initiating graceful shutdown..."
    );

    let report = pool.exit().await;
    if report.lost_records > 0 {
        warn!(
            lost_records = report.lost_records,
            "Shutdown complete with undelivered records"
        );
    } else {
        info!(records_sent = report.records_sent, "Shutdown complete");
    }

    eprintln!("{}", serde_json::to_string(&report)?);
    Ok(())
}

/// Enqueue non-empty lines from `reader` until end of input, a read or
/// enqueue error, or `shutdown` completes. Returns the enqueued count.
async fn forward_lines<R, S, F>(reader: R, pool: &Pool<S>, shutdown: F) -> u64
where
    R: AsyncBufRead + Unpin,
    S: Sink,
    F: Future,
{
    let mut lines = reader.lines();
    let mut enqueued: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Received shutdown signal (Ctrl+C)");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) if line.is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(enqueued, "End of input");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };

        // A producer held by backpressure still sees Ctrl+C
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Received shutdown signal (Ctrl+C)");
                break;
            }
            result = pool.enqueue(line) => match result {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    error!(error = %e, "Failed to enqueue record");
                    break;
                }
            },
        }
    }

    enqueued
}

fn validate_config(config: &PoolConfig) -> Result<()> {
    println!("✓ Configuration valid!\n");

    println!("Workers:");
    match config.worker_mode() {
        WorkerMode::Fixed(n) => println!("  Fixed: {}", n),
        WorkerMode::Autoscaled { min, max } => {
            println!("  Autoscaled: {}..={}", min, max);
            println!("  Warm-up threshold: {}", config.warm_up_threshold);
            println!("  Evaluation interval: {}ms", config.evaluation_interval_ms);
            println!("  Cool-down period: {}ms", config.cool_down_period_ms);
        }
    }
    println!();

    println!("Buffer:");
    println!("  Capacity: {} records", config.buffer_capacity);
    println!("  Max batch: {} records", config.max_batch_records);
    println!();

    println!("Reconnect policy:");
    println!(
        "  Error threshold: {} failures per {}ms",
        config.error_threshold, config.error_window_ms
    );
    println!("  Connection retry: {}ms", config.connection_retry_ms);
    println!("  Connect timeout: {}ms", config.connect_timeout_ms);
    println!();

    println!("Sink parameters:");
    let params = serde_yaml::to_string(&config.sink).context("Failed to render sink parameters")?;
    for line in params.lines() {
        println!("  {}", line);
    }

    Ok(())
}

async fn check_sink(config: &PoolConfig) -> Result<()> {
    print!("Sink (stdout)... ");
    match verify_sink(config, Arc::new(StdoutSink::new())).await {
        Ok(()) => {
            println!("✓ connected");
            Ok(())
        }
        Err(e) => {
            println!("✗ failed: {}", e);
            Err(e.into())
        }
    }
}
