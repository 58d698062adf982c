//! Shardstream CLI
//!
//! `split` reads a stream on stdin, distributes its erasure-coded shards
//! over the configured backends and writes the index to stdout. `join` reads
//! an index on stdin and writes the reassembled stream to stdout.
//!
//! ```text
//! shardstream --config fleet.yaml split < data > data.idx
//! shardstream --config fleet.yaml join < data.idx > data
//! ```

use clap::{Parser, Subcommand};
use std::io::BufReader;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardstream::config::Config;
use shardstream::error::Result;
use shardstream::run::{fetch_stream, store_stream, StreamOpts};
use shardstream::stores::{scan_backends, CopiesReg, LsEntrySink, QuotaMan};
use shardstream::Parity;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Shardstream - erasure-coded stream distribution over storage backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, env = "SHARDSTREAM_CONFIG", default_value = "shardstream.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the stream on stdin, writing its index to stdout
    Split,
    /// Reassemble the stream for the index on stdin, writing it to stdout
    Join,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = Config::load(&args.config)?;
    info!(
        config = %args.config,
        data_shards = config.data_shards,
        parity_shards = config.parity_shards,
        min_copies = config.min_copies,
        backends = config.backends.len(),
        "starting"
    );

    let opts = StreamOpts {
        parity: Parity::new(config.data_shards, config.parity_shards)?,
        compression: config.compression,
        min_copies: config.min_copies,
        concurrency: config.concurrency.clone(),
    };

    let copiers = config.build_copiers();
    let reg = Arc::new(CopiesReg::new());
    let quota = Arc::new(QuotaMan::new());
    for backend in &config.backends {
        if let Some(capacity) = backend.quota() {
            quota.set_capacity(backend.id(), capacity);
        }
    }

    // Both operations start from what the backends already hold: split to
    // count existing copies and usage, join to know where shards live.
    let sinks: Vec<Arc<dyn LsEntrySink>> = vec![reg.clone(), quota.clone()];
    scan_backends(&copiers, &sinks).await?;
    info!(known_shards = reg.len(), "backends scanned");

    match args.command {
        Command::Split => {
            store_stream(
                std::io::stdin(),
                tokio::io::stdout(),
                config.split_bounds(),
                copiers,
                reg,
                quota,
                &opts,
            )
            .await?;
        }
        Command::Join => {
            let (_, reconstructed) = fetch_stream(
                BufReader::new(std::io::stdin()),
                tokio::io::stdout(),
                copiers,
                reg,
                &opts,
            )
            .await?;
            if reconstructed > 0 {
                info!(groups = reconstructed, "recovered damaged shard groups");
            }
        }
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr: stdout carries the index or the stream itself.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
