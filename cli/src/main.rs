//! feeindex CLI: scrape `FeesCollected` events and inspect indexed state.
//!
//! # Commands
//! ```text
//! feeindex run      [--chain <id>]...      scrape every (or the selected) chain until Ctrl-C
//! feeindex advance  --chain <id>           run exactly one cycle
//! feeindex status                          checkpoint and event count per chain
//! feeindex events   --chain <id> [--integrator <addr>] [--from <n>] [--to <n>] [--limit <n>]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use feeindex_core::scraper::Advance;
use feeindex_core::types::ChainId;
use feeindex_evm::{EvmScraper, ScraperBuilder};
use feeindex_storage::EventQuery;

mod backend;
mod config;
mod logging;
mod runner;

use backend::Backend;
use config::{ChainConfig, Config};
use runner::Timing;

const DEFAULT_DATABASE_URL: &str = "sqlite:./feeindex.db";

#[derive(Parser)]
#[command(
    name = "feeindex",
    about = "Resumable FeesCollected event scraper for EVM chains",
    long_about = "
FeeIndex scrapes FeesCollected events of the fee-collection contract on every
configured EVM chain, in bounded block chunks, with a persisted per-chain
checkpoint. Re-running a chunk never stores an event twice.

ENVIRONMENT VARIABLES:
  FEEINDEX_CONFIG         Path to the YAML config (default: feeindex.yaml)
  FEEINDEX_DATABASE_URL   sqlite:… or postgres://… (overrides the config)
  RUST_LOG                Log filter (overrides the config's log section)
",
    version
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, env = "FEEINDEX_CONFIG", default_value = "feeindex.yaml")]
    config: PathBuf,

    /// Database URL (overrides `database_url` in the config)
    #[arg(long, global = true, env = "FEEINDEX_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape continuously, one task per chain, until Ctrl-C
    Run {
        /// Only scrape these chain ids (repeatable; default: all configured)
        #[arg(long = "chain")]
        chains: Vec<ChainId>,
    },

    /// Run exactly one advance cycle for a chain
    Advance {
        #[arg(long)]
        chain: ChainId,
    },

    /// Show checkpoint and stored event count per configured chain
    Status,

    /// Print stored events as JSON
    Events {
        #[arg(long)]
        chain: ChainId,
        /// Only events for this integrator address
        #[arg(long)]
        integrator: Option<String>,
        /// First block (inclusive)
        #[arg(long)]
        from: Option<u64>,
        /// Last block (inclusive)
        #[arg(long)]
        to: Option<u64>,
        #[arg(long, default_value_t = 100)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    logging::init_tracing(&config.log);

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| config.database_url.clone())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let backend = Backend::connect(&database_url).await?;
    info!(backend = backend.name(), chains = config.chains.len(), "storage ready");

    match cli.command {
        Commands::Run { chains } => cmd_run(&config, &backend, &chains).await,
        Commands::Advance { chain } => cmd_advance(&config, &backend, chain).await,
        Commands::Status => cmd_status(&config, &backend).await,
        Commands::Events { chain, integrator, from, to, limit } => {
            let mut query = EventQuery::chain(chain).blocks(from, to).limit(limit);
            query.integrator = integrator;
            cmd_events(&backend, &query).await
        }
    }
}

fn build_scraper(chain: &ChainConfig, config: &Config, backend: &Backend) -> Result<EvmScraper> {
    let scraper = chain.scraper_config(&config.defaults);
    ScraperBuilder::new(chain.chain_id)
        .provider_uri(&chain.provider_uri)
        .contract_address(&chain.contract_address)
        .oldest_block(scraper.oldest_block)
        .chunk_size(scraper.chunk_size)
        .confirmation_lag(scraper.confirmation_lag)
        .timestamp_concurrency(chain.source_config().timestamp_concurrency)
        .build(backend.event_store(), backend.checkpoint_store())
        .with_context(|| format!("building scraper for chain {}", chain.chain_id))
}

async fn cmd_run(config: &Config, backend: &Backend, only: &[ChainId]) -> Result<()> {
    let chains = config.select_chains(only)?;
    let timing = Timing::from_millis(config.poll_interval_ms, config.error_backoff_ms);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::with_capacity(chains.len());
    for chain in chains {
        let scraper = build_scraper(chain, config, backend)?;
        tasks.push(tokio::spawn(runner::run_chain(scraper, timing, shutdown_rx.clone())));
    }
    info!(chains = tasks.len(), "scrapers running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested; finishing in-flight cycles");
    shutdown_tx.send(true).ok();

    for task in tasks {
        task.await.context("scraper task panicked")?;
    }
    Ok(())
}

async fn cmd_advance(config: &Config, backend: &Backend, chain_id: ChainId) -> Result<()> {
    let chain = config
        .chain(chain_id)
        .with_context(|| format!("chain {chain_id} is not configured"))?;
    let scraper = build_scraper(chain, config, backend)?;

    match scraper.advance().await? {
        Advance::UpToDate { last_block, effective_head } => {
            println!("chain {chain_id}: up to date (checkpoint {last_block}, confirmed head {effective_head})");
        }
        Advance::Advanced { range, fetched, inserted, duplicates } => {
            println!(
                "chain {chain_id}: processed blocks {range}: {fetched} events fetched, \
                 {inserted} inserted, {duplicates} duplicates; checkpoint {}",
                range.to
            );
        }
    }
    Ok(())
}

async fn cmd_status(config: &Config, backend: &Backend) -> Result<()> {
    println!("{:<12} {:<14} {:>10}", "CHAIN", "CHECKPOINT", "EVENTS");
    for chain in &config.chains {
        let checkpoint = match backend.checkpoint(chain.chain_id).await? {
            Some(cp) => cp.last_block.to_string(),
            None => "not started".to_string(),
        };
        let events = backend.event_count(chain.chain_id).await?;
        println!("{:<12} {:<14} {:>10}", chain.chain_id, checkpoint, events);
    }
    Ok(())
}

async fn cmd_events(backend: &Backend, query: &EventQuery) -> Result<()> {
    let events = backend.events(query).await?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
