//! utxoindex — sync a Bitcoin Core node into the address index and query it.
//!
//! # Commands
//! ```text
//! utxoindex run   -c <config.json>
//! utxoindex query -c <config.json> --address <addr>... [--status all|unspent]
//!                 [--source blocks|mempool|any] [--from <height>] [--to <height>] [--sync]
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use utxoindex_bitcoin::BitcoinNodeClient;
use utxoindex_core::{AddressQuery, IndexerBuilder, KvStore, MemoryStore, SyncLoop};
use utxoindex_storage::SqliteStore;

mod config;

use config::{AppConfig, LoggerConfig, StorageConfig};

#[derive(Parser)]
#[command(
    name = "utxoindex",
    about = "Reorg-safe address, transaction and unspent-output index for Bitcoin Core",
    version
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE", default_value = "./utxoindex.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the node until Ctrl-C
    Run,

    /// Answer one address query against the stored index
    Query {
        /// Address to include (repeatable)
        #[arg(short, long = "address", required = true, num_args = 1..)]
        addresses: Vec<String>,
        /// all | unspent
        #[arg(long)]
        status: Option<String>,
        /// blocks | mempool | any
        #[arg(long)]
        source: Option<String>,
        /// Exclusive lower height bound
        #[arg(long)]
        from: Option<String>,
        /// Inclusive upper height bound
        #[arg(long)]
        to: Option<String>,
        /// Run one sync cycle (blocks and pending pool) before answering
        #[arg(long)]
        sync: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    init_tracing(&config.logger)?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Query {
            addresses,
            status,
            source,
            from,
            to,
            sync,
        } => {
            let query = AddressQuery::parse(
                addresses,
                status.as_deref(),
                source.as_deref(),
                from.as_deref(),
                to.as_deref(),
            )?;
            cmd_query(config, query, sync).await
        }
    }
}

fn init_tracing(logger: &LoggerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logger.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console = if logger.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };
    let file = match &logger.filename {
        Some(path) => {
            let sink = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Arc::new(sink))
                    .boxed(),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

async fn open_store(storage: &StorageConfig) -> Result<Arc<dyn KvStore>> {
    match &storage.path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("opening index database {path}"))?;
            info!(path = %path, "index database opened");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no storage.path configured, index is kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build(config: &AppConfig) -> Result<SyncLoop<BitcoinNodeClient>> {
    let store = open_store(&config.storage).await?;
    let node = BitcoinNodeClient::from_config(&config.node).context("creating node client")?;
    if let Some(network) = &config.node.network {
        node.ensure_network(network)
            .await
            .with_context(|| format!("checking that the node runs {network}"))?;
        info!(%network, "node network verified");
    }
    let mut sync = IndexerBuilder::from_config(config.indexer.clone()).build(node, store);
    sync.bootstrap().await.context("restoring index state")?;
    Ok(sync)
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    info!(node = %config.node.url, window = config.indexer.window_size, "starting utxoindex");
    let sync = build(&config).await?;
    // Outlives the sync loop: a stalled loop still leaves the index readable.
    let queries = sync.query_engine();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(sync.run(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("shutdown requested, finishing current step");
        }
        joined = &mut handle => {
            match joined.context("sync task panicked")? {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let latest = queries.latest();
                    error!(
                        error = %e,
                        height = latest.height,
                        hash = %latest.hash,
                        "sync stalled, index frozen at last good state; Ctrl-C to exit"
                    );
                    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
                    return Err(e.into());
                }
            }
        }
    }

    // The receiver may already be gone if the loop ended concurrently.
    let _ = shutdown_tx.send(true);
    handle.await.context("sync task panicked")??;
    let latest = queries.latest();
    info!(height = latest.height, hash = %latest.hash, "utxoindex stopped");
    Ok(())
}

async fn cmd_query(config: AppConfig, query: AddressQuery, sync_first: bool) -> Result<()> {
    let mut sync = build(&config).await?;
    if sync_first {
        let report = sync.poll_once().await.context("sync cycle")?;
        info!(?report, "synced before query");
    }
    let response = sync.query_engine().query_addresses(&query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
