//! Receipt waiter: polls the chain until every hash of a write has a
//! terminal receipt, short-circuiting on the first revert.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info};

use crate::error::{FetchError, SettleError};
use crate::policy::{Attempt, Condition, PollError, PollPolicy};
use crate::types::{TransactionReceipt, TxHash};

/// Read access to transaction receipts on the chain.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Fetch the receipt for `hash`. `Ok(None)` means "not mined yet".
    async fn receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, FetchError>;
}

/// Waits for the receipts of one logical write.
pub struct ReceiptWaiter {
    source: Arc<dyn ReceiptSource>,
    policy: PollPolicy,
}

impl ReceiptWaiter {
    pub fn new(source: Arc<dyn ReceiptSource>, policy: PollPolicy) -> Self {
        Self { source, policy }
    }

    /// Wait until every hash has a successful receipt.
    ///
    /// Receipts are returned in input order. All hashes share one deadline;
    /// each poll round fetches the unresolved ones concurrently.
    pub async fn await_receipts(
        &self,
        hashes: &[TxHash],
    ) -> Result<Vec<TransactionReceipt>, SettleError> {
        if hashes.is_empty() {
            return Err(SettleError::NoTransactions);
        }

        let mut seen = HashSet::new();
        let unique: Vec<TxHash> = hashes
            .iter()
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect();
        let total = unique.len();

        let mut condition = ReceiptCondition {
            source: self.source.as_ref(),
            pending: unique,
            resolved: HashMap::with_capacity(total),
        };

        let resolved = match self.policy.run(&mut condition).await {
            Ok(resolved) => resolved,
            Err(PollError::Fatal(receipt)) => {
                info!(
                    hash = %receipt.hash,
                    block = receipt.block_number,
                    reason = receipt.revert_reason.as_deref().unwrap_or("-"),
                    "transaction reverted"
                );
                return Err(SettleError::Reverted {
                    hash: receipt.hash,
                    block_number: receipt.block_number,
                    reason: receipt.revert_reason,
                });
            }
            Err(PollError::DeadlineExceeded { elapsed, attempts }) => {
                debug!(attempts, pending = ?condition.pending, "receipt deadline exceeded");
                return Err(SettleError::ReceiptTimeout {
                    elapsed,
                    pending: condition.pending.len(),
                    total,
                });
            }
        };

        Ok(hashes
            .iter()
            .filter_map(|h| resolved.get(h).cloned())
            .collect())
    }
}

struct ReceiptCondition<'a> {
    source: &'a dyn ReceiptSource,
    pending: Vec<TxHash>,
    resolved: HashMap<TxHash, TransactionReceipt>,
}

#[async_trait]
impl<'a> Condition for ReceiptCondition<'a> {
    type Output = HashMap<TxHash, TransactionReceipt>;
    type Error = TransactionReceipt;

    fn name(&self) -> &'static str {
        "receipts"
    }

    async fn attempt(&mut self) -> Attempt<Self::Output, Self::Error> {
        let source = self.source;
        let mut fetches: FuturesUnordered<_> = self
            .pending
            .iter()
            .cloned()
            .map(|hash| async move {
                let result = source.receipt(&hash).await;
                (hash, result)
            })
            .collect();

        let mut transient = None;
        while let Some((hash, result)) = fetches.next().await {
            match result {
                // Remaining in-flight fetches are dropped with `fetches`.
                Ok(Some(receipt)) if receipt.is_reverted() => return Attempt::Fatal(receipt),
                Ok(Some(receipt)) => {
                    debug!(%hash, block = receipt.block_number, "receipt confirmed");
                    // the round may be cut off by the deadline before it ends
                    self.pending.retain(|h| h != &hash);
                    self.resolved.insert(hash, receipt);
                }
                Ok(None) => {}
                Err(e) => transient = Some(e),
            }
        }

        if self.pending.is_empty() {
            Attempt::Ready(std::mem::take(&mut self.resolved))
        } else if let Some(e) = transient {
            Attempt::Transient(e)
        } else {
            Attempt::Pending
        }
    }
}
