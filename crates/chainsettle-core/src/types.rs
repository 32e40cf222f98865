//! Chain-side types shared by the waiters.

use serde::{Deserialize, Serialize};

/// A transaction hash (`0x…`).
pub type TxHash = String;

// ─── ReceiptStatus ────────────────────────────────────────────────────────────

/// Terminal execution status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Reverted => write!(f, "reverted"),
        }
    }
}

// ─── TransactionReceipt ───────────────────────────────────────────────────────

/// The chain's confirmation record for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub hash: TxHash,
    /// Execution status.
    pub status: ReceiptStatus,
    /// Decoded revert reason. Best-effort; absent even for many reverts.
    pub revert_reason: Option<String>,
    /// Block the transaction was included in.
    pub block_number: u64,
}

impl TransactionReceipt {
    /// A successful receipt.
    pub fn success(hash: impl Into<TxHash>, block_number: u64) -> Self {
        Self {
            hash: hash.into(),
            status: ReceiptStatus::Success,
            revert_reason: None,
            block_number,
        }
    }

    /// A reverted receipt with an optional decoded reason.
    pub fn reverted(hash: impl Into<TxHash>, block_number: u64, reason: Option<String>) -> Self {
        Self {
            hash: hash.into(),
            status: ReceiptStatus::Reverted,
            revert_reason: reason,
            block_number,
        }
    }

    pub fn is_reverted(&self) -> bool {
        self.status == ReceiptStatus::Reverted
    }
}

/// The block the indexer must reach for every receipt in the set to be visible.
pub fn highest_block(receipts: &[TransactionReceipt]) -> Option<u64> {
    receipts.iter().map(|r| r.block_number).max()
}
