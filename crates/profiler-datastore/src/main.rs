// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Profiler Datastore CLI
//!
//! Hosts the datastore and inspects existing datastore directories.
//!
//! # Usage
//!
//! ```bash
//! # Serve from a directory, polling a scripted mock stream
//! profiler-datastore --dir /tmp/datastore --mock
//!
//! # Print table record counts of an existing datastore
//! profiler-datastore --dir /tmp/datastore stats
//!
//! # Print the effective configuration
//! profiler-datastore --config datastore.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use profiler_datastore::{
    collect_report, BackingNamespace, Characteristic, DataStoreService, DatabaseRegistry,
    DatastoreConfig, MockChannel, Stream, TokioExecutor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "profiler-datastore")]
#[command(about = "Profiler Datastore - polls device streams into SQLite", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Datastore directory (overrides the configuration file)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Poll interval in milliseconds (overrides the configuration file)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Connect a mock stream (for testing without a device)
    #[arg(long)]
    mock: bool,

    /// Runner statistics interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show record counts of every database in the datastore directory
    Stats,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::Stats => cmd_stats(&config.datastore_dir),
            Commands::Config => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        };
    }

    tracing::info!("Profiler Datastore starting...");
    tracing::info!("  Directory: {}", config.datastore_dir.display());
    tracing::info!("  Poll interval: {} ms", config.poll_interval_ms);

    let datastore = Arc::new(
        DataStoreService::builder(config)
            .fetch_executor(Arc::new(TokioExecutor::current()))
            .build()
            .context("Failed to start datastore")?,
    );

    if args.mock {
        tracing::info!("Connecting mock stream");
        let stream = Stream::new(1, std::process::id() as i32, "mock");
        datastore.connect(&stream, Arc::new(MockChannel::new()))?;
    }

    if args.stats_interval > 0 {
        let datastore = Arc::clone(&datastore);
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                print_runner_stats(&datastore);
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    // shutdown() joins runner cycles and the report thread
    let stopping = Arc::clone(&datastore);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    Ok(())
}

fn build_config(args: &Args) -> Result<DatastoreConfig> {
    let mut config = match &args.config {
        Some(path) => DatastoreConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DatastoreConfig::default(),
    };

    if let Some(dir) = &args.dir {
        config.datastore_dir = dir.clone();
    }
    if let Some(ms) = args.poll_interval {
        config.poll_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_stats(dir: &Path) -> Result<()> {
    let registry = DatabaseRegistry::new(dir);
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        registry
            .get_or_create(&BackingNamespace::new(name, Characteristic::Durable))
            .with_context(|| format!("Failed to open {}", path.display()))?;
    }

    if registry.is_empty() {
        println!("No databases in {}", dir.display());
        return Ok(());
    }

    let report = collect_report(&registry, Instant::now());
    println!("Datastore: {}", dir.display());
    println!("  Shared database size: {} MB", report.total_disk_mb);
    for table in &report.tables {
        println!(
            "  {}/{} ({} records)",
            table.database, table.table, table.num_records
        );
    }
    Ok(())
}

fn print_runner_stats(datastore: &DataStoreService) {
    for (stream_id, category) in datastore.active_runners() {
        if let Some(runner) = datastore.runner(stream_id, category) {
            let stats = runner.stats();
            println!(
                "stream {} {:<6} cycles={} failures={} panics={}",
                stream_id,
                category.to_string(),
                stats.cycles,
                stats.failures,
                stats.panics
            );
        }
    }
}
