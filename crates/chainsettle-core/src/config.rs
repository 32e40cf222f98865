//! Tunables for the consistency facade.
//!
//! These four values are the whole configuration surface of the waiters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettleError;
use crate::policy::PollPolicy;

/// Receipt / indexing deadlines and poll intervals, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Overall deadline for every receipt of one write to resolve.
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    /// Delay between receipt poll rounds.
    #[serde(default = "default_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Overall deadline for the indexer to reach the write's block.
    #[serde(default = "default_indexing_timeout_ms")]
    pub indexing_timeout_ms: u64,
    /// Delay between indexer status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub indexing_poll_interval_ms: u64,
}

fn default_receipt_timeout_ms() -> u64 { 240_000 }
fn default_indexing_timeout_ms() -> u64 { 180_000 }
fn default_poll_interval_ms() -> u64 { 500 }

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_ms: default_receipt_timeout_ms(),
            receipt_poll_interval_ms: default_poll_interval_ms(),
            indexing_timeout_ms: default_indexing_timeout_ms(),
            indexing_poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SettleConfig {
    /// Reject intervals of zero (a busy loop) and deadlines shorter than
    /// their own interval.
    pub fn validate(&self) -> Result<(), SettleError> {
        check("receipt", self.receipt_timeout_ms, self.receipt_poll_interval_ms)?;
        check("indexing", self.indexing_timeout_ms, self.indexing_poll_interval_ms)
    }

    pub fn receipt_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.receipt_timeout_ms),
            Duration::from_millis(self.receipt_poll_interval_ms),
        )
    }

    pub fn indexing_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.indexing_timeout_ms),
            Duration::from_millis(self.indexing_poll_interval_ms),
        )
    }
}

fn check(stage: &str, timeout_ms: u64, interval_ms: u64) -> Result<(), SettleError> {
    if interval_ms == 0 {
        return Err(SettleError::Config(format!("{stage} poll interval must be non-zero")));
    }
    if timeout_ms < interval_ms {
        return Err(SettleError::Config(format!(
            "{stage} timeout ({timeout_ms}ms) is shorter than its poll interval ({interval_ms}ms)"
        )));
    }
    Ok(())
}
