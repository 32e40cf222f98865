//! chainsettle CLI: wait for writes to become visible, run the registry
//! projection, inspect aggregate stats.
//!
//! Usage:
//! ```bash
//! # Wait until two transactions are mined and indexed by a subgraph
//! chainsettle wait --rpc http://localhost:8545 --indexer http://localhost:8000/subgraphs/name/trex 0xaa… 0xbb…
//!
//! # Project registry events into ./settle.db and keep following the chain
//! chainsettle project --rpc http://localhost:8545 --db ./settle.db --from-block 5000000
//!
//! # Submit a signed transaction and wait until the local projection has it
//! chainsettle submit --rpc http://localhost:8545 --db ./settle.db --raw 0x02f8…
//!
//! # Show a registry's counters and snapshot history
//! chainsettle stats --db ./settle.db --registry 0x7f9e…
//! ```

mod args;
mod config;
mod logging;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use chainsettle_core::aggregate::SnapshotRange;
use chainsettle_core::{
    AggregationEngine, BlockPointer, ConsistencyFacade, IndexerStatus, SettleConfig,
};
use chainsettle_evm::registry::{topic0, ERC3643_EVENTS};
use chainsettle_evm::{EvmChainClient, GraphQlIndexerStatus, HttpTransport, ProjectionBuilder};
use chainsettle_storage::SqliteStorage;

use crate::args::{Cli, Command};
use crate::config::CliConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Load config, start logging, run the command.
async fn run(cli: Cli) -> Result<(), String> {
    let project = match &cli.command {
        Command::Project(args) => Some(args),
        _ => None,
    };
    let config = CliConfig::load(&cli.common, project)?;
    logging::init_tracing(&config.log);

    match cli.command {
        Command::Wait { hashes } => cmd_wait(hashes, config).await,
        Command::Submit { raw } => cmd_submit(raw, config).await,
        Command::Project(_) => cmd_project(config).await,
        Command::Stats { registry, from, to } => {
            cmd_stats(registry, SnapshotRange { from, to }, config).await
        }
        Command::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn rpc_client(config: &CliConfig) -> Result<EvmChainClient, String> {
    let transport = HttpTransport::default_for(config.rpc_url()?).map_err(|e| e.to_string())?;
    Ok(EvmChainClient::new(Arc::new(transport)))
}

/// Indexer progress from `--indexer` (GraphQL) or `--db` (local pointer).
async fn indexer_status(config: &CliConfig) -> Result<Arc<dyn IndexerStatus>, String> {
    if let Some(url) = &config.indexer_url {
        let status = GraphQlIndexerStatus::new(url.clone(), Duration::from_secs(30))
            .map_err(|e| e.to_string())?;
        return Ok(Arc::new(status));
    }
    if let Some(path) = &config.db {
        let storage = SqliteStorage::open(path).await.map_err(|e| e.to_string())?;
        return Ok(Arc::new(BlockPointer::new(
            Arc::new(storage),
            config.projection.chain.clone(),
            config.projection.id.clone(),
        )));
    }
    Err("one of --indexer or --db is required".into())
}

fn facade(
    client: Arc<EvmChainClient>,
    status: Arc<dyn IndexerStatus>,
    settle: &SettleConfig,
) -> Result<ConsistencyFacade, String> {
    ConsistencyFacade::new(client, status, settle).map_err(|e| e.to_string())
}

async fn cmd_wait(hashes: Vec<String>, config: CliConfig) -> Result<(), String> {
    let client = Arc::new(rpc_client(&config)?);
    let status = indexer_status(&config).await?;
    let facade = facade(client, status, &config.settle)?;

    let indexed = facade
        .await_write_visible(&hashes)
        .await
        .map_err(|e| e.to_string())?;
    println!("visible: {} transaction(s), indexed block {indexed}", hashes.len());
    Ok(())
}

async fn cmd_submit(raws: Vec<String>, config: CliConfig) -> Result<(), String> {
    let client = Arc::new(rpc_client(&config)?);
    let status = indexer_status(&config).await?;
    let facade = facade(client.clone(), status, &config.settle)?;

    let indexed = facade
        .submit_and_await(client.as_ref(), &raws)
        .await
        .map_err(|e| e.to_string())?;
    println!("visible: indexed block {indexed}");
    Ok(())
}

async fn cmd_project(config: CliConfig) -> Result<(), String> {
    let client = rpc_client(&config)?;
    let storage = Arc::new(
        SqliteStorage::open(config.db()?)
            .await
            .map_err(|e| e.to_string())?,
    );
    let engine = Arc::new(AggregationEngine::new(storage.clone()));

    let mut projection =
        ProjectionBuilder::from_config(config.projection.clone()).build(client, engine, storage);

    tracing::info!(
        chain = %config.projection.chain,
        from = config.projection.from_block,
        to = ?config.projection.to_block,
        addresses = config.projection.addresses.len(),
        "starting projection"
    );
    projection.run().await.map_err(|e| e.to_string())?;
    println!("projection {}", projection.state());
    Ok(())
}

async fn cmd_stats(
    registry: Option<String>,
    range: SnapshotRange,
    config: CliConfig,
) -> Result<(), String> {
    let storage = Arc::new(
        SqliteStorage::open(config.db()?)
            .await
            .map_err(|e| e.to_string())?,
    );

    let Some(registry) = registry else {
        let all = storage.aggregates().await.map_err(|e| e.to_string())?;
        let rejected = storage.rejected_count().await.map_err(|e| e.to_string())?;
        println!(
            "{}",
            to_json(&serde_json::json!({ "aggregates": all, "rejected_events": rejected }))?
        );
        return Ok(());
    };

    let engine = AggregationEngine::new(storage);
    let registry = registry.to_ascii_lowercase();
    let state = engine
        .aggregate(&registry)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("registry {registry} has no projected events"))?;
    let snapshots = engine
        .snapshots(&registry, range)
        .await
        .map_err(|e| e.to_string())?;

    println!(
        "{}",
        to_json(&serde_json::json!({ "aggregate": state, "snapshots": snapshots }))?
    );
    Ok(())
}

fn cmd_info() {
    println!("chainsettle {}\n", env!("CARGO_PKG_VERSION"));
    println!("Default configuration:");
    println!(
        "{}\n",
        serde_json::to_string_pretty(&CliConfig::default()).unwrap_or_default()
    );
    println!("Projected registry events:");
    for (signature, registry_kind, kind) in ERC3643_EVENTS {
        println!("  {:<17} {:<8} {signature}", registry_kind.as_str(), kind.to_string());
        println!("  {:<26} {}", "", topic0(signature));
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}
