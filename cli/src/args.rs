//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "chainsettle",
    about = "Read-your-writes for EVM registries: receipts, indexer progress, aggregate stats",
    long_about = "
Wait until a write is mined and visible through an indexer, run the ERC-3643
registry projection into SQLite, and inspect the projected counters.

Flags given on the command line override values from --config.
",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every command.
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// JSON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Chain JSON-RPC endpoint
    #[arg(long, global = true)]
    pub rpc: Option<String>,
    /// GraphQL indexer to wait for
    #[arg(long, global = true)]
    pub indexer: Option<String>,
    /// SQLite database written by `project`
    #[arg(long, global = true)]
    pub db: Option<String>,
    /// Chain name the projection pointer is keyed by
    #[arg(long, global = true)]
    pub chain: Option<String>,
    #[arg(long, global = true, value_name = "MS")]
    pub receipt_timeout_ms: Option<u64>,
    #[arg(long, global = true, value_name = "MS")]
    pub receipt_interval_ms: Option<u64>,
    #[arg(long, global = true, value_name = "MS")]
    pub indexing_timeout_ms: Option<u64>,
    #[arg(long, global = true, value_name = "MS")]
    pub indexing_interval_ms: Option<u64>,
    /// trace | debug | info | warn | error
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    /// Log JSON lines instead of text
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait until transactions are mined and indexed
    Wait {
        /// Transaction hashes of one write
        #[arg(required = true, value_name = "HASH")]
        hashes: Vec<String>,
    },

    /// Submit signed raw transactions, then wait like `wait`
    Submit {
        /// Signed transaction (hex), repeatable
        #[arg(long = "raw", required = true, value_name = "HEX")]
        raw: Vec<String>,
    },

    /// Project registry events into a SQLite database
    Project(ProjectArgs),

    /// Show a registry's counters and snapshots
    Stats {
        /// One registry (omit to list all)
        #[arg(long)]
        registry: Option<String>,
        /// Snapshot window start (unix seconds)
        #[arg(long, requires = "registry")]
        from: Option<i64>,
        /// Snapshot window end (unix seconds)
        #[arg(long, requires = "registry")]
        to: Option<i64>,
    },

    /// Show defaults and the registry events that are projected
    Info,
}

#[derive(Args, Debug, Default)]
pub struct ProjectArgs {
    #[arg(long)]
    pub from_block: Option<u64>,
    #[arg(long)]
    pub to_block: Option<u64>,
    /// Blocks behind head before a block is projected
    #[arg(long)]
    pub confirmations: Option<u64>,
    /// Blocks per eth_getLogs call
    #[arg(long)]
    pub batch_size: Option<u64>,
    /// Registry contract to watch, repeatable
    #[arg(long = "address", value_name = "ADDR")]
    pub addresses: Vec<String>,
}
