//! CLI configuration: optional JSON file, then the parsed flags on top.

use serde::{Deserialize, Serialize};

use chainsettle_core::SettleConfig;
use chainsettle_evm::ProjectionConfig;

use crate::args::{CommonArgs, ProjectArgs};
use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// JSON-RPC endpoint of the chain.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// GraphQL endpoint of an external indexer.
    #[serde(default)]
    pub indexer_url: Option<String>,
    /// SQLite database written by `project`.
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub settle: SettleConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl CliConfig {
    /// Load `--config FILE` if given, then layer the parsed flags on top.
    pub fn load(common: &CommonArgs, project: Option<&ProjectArgs>) -> Result<Self, String> {
        let mut config = match &common.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
                serde_json::from_str(&text)
                    .map_err(|e| format!("invalid config {}: {e}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_common(common);
        if let Some(project) = project {
            config.apply_project(project);
        }
        config.settle.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    fn apply_common(&mut self, args: &CommonArgs) {
        if let Some(url) = &args.rpc {
            self.rpc_url = Some(url.clone());
        }
        if let Some(url) = &args.indexer {
            self.indexer_url = Some(url.clone());
        }
        if let Some(path) = &args.db {
            self.db = Some(path.clone());
        }
        if let Some(chain) = &args.chain {
            self.projection.chain = chain.clone();
        }

        let settle = &mut self.settle;
        if let Some(ms) = args.receipt_timeout_ms {
            settle.receipt_timeout_ms = ms;
        }
        if let Some(ms) = args.receipt_interval_ms {
            settle.receipt_poll_interval_ms = ms;
        }
        if let Some(ms) = args.indexing_timeout_ms {
            settle.indexing_timeout_ms = ms;
        }
        if let Some(ms) = args.indexing_interval_ms {
            settle.indexing_poll_interval_ms = ms;
        }

        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }
        if args.json_logs {
            self.log.json = true;
        }
    }

    fn apply_project(&mut self, args: &ProjectArgs) {
        let projection = &mut self.projection;
        if let Some(block) = args.from_block {
            projection.from_block = block;
        }
        if let Some(block) = args.to_block {
            projection.to_block = Some(block);
        }
        if let Some(depth) = args.confirmations {
            projection.confirmation_depth = depth;
        }
        if let Some(size) = args.batch_size {
            projection.batch_size = size.max(1);
        }
        if !args.addresses.is_empty() {
            projection.addresses = args.addresses.clone();
        }
    }

    pub fn rpc_url(&self) -> Result<&str, String> {
        self.rpc_url.as_deref().ok_or_else(|| "--rpc is required".to_string())
    }

    pub fn db(&self) -> Result<&str, String> {
        self.db.as_deref().ok_or_else(|| "--db is required".to_string())
    }
}
