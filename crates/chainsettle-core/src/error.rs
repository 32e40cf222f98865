//! Error taxonomy for the consistency bridge and the projection side.
//!
//! "The chain rejected my input" (`Submission`, `Reverted`) and "the
//! infrastructure has not caught up yet" (`ReceiptTimeout`, `IndexingTimeout`)
//! are distinct variants and must stay that way.

use std::time::Duration;

use thiserror::Error;

use crate::aggregate::{EventKind, EventPosition, RegistryKind};
use crate::types::TxHash;

/// Shown when a reverted receipt carries no decodable reason.
pub const GENERIC_REVERT_REASON: &str = "execution reverted (no reason available)";

/// A failed read from a collaborator (chain RPC, indexer status).
///
/// Always transient: waiters retry these until their deadline.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The chain refused to accept a transaction (bad input, funding, nonce…).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SubmissionError {
    pub message: String,
}

impl SubmissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The classified outcome of a failed consistency-facade call.
#[derive(Debug, Clone, Error)]
pub enum SettleError {
    #[error("transaction submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error(
        "transaction {hash} reverted in block {block_number}: {}",
        .reason.as_deref().unwrap_or(GENERIC_REVERT_REASON)
    )]
    Reverted {
        hash: TxHash,
        block_number: u64,
        reason: Option<String>,
    },

    #[error(
        "timed out after {:.1}s waiting for receipts ({pending} of {total} unresolved)",
        .elapsed.as_secs_f64()
    )]
    ReceiptTimeout {
        elapsed: Duration,
        pending: usize,
        total: usize,
    },

    #[error(
        "timed out after {:.1}s waiting for the indexer to reach block {target} (last seen: {})",
        .elapsed.as_secs_f64(),
        .last_seen.map(|b| b.to_string()).unwrap_or_else(|| "none".into())
    )]
    IndexingTimeout {
        elapsed: Duration,
        target: u64,
        last_seen: Option<u64>,
    },

    #[error("no transaction hashes to wait for")]
    NoTransactions,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SettleError {
    /// Returns `true` if the chain rejected the write (resubmitting the same
    /// input will not help).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Submission(_) | Self::Reverted { .. })
    }

    /// Returns `true` if the write may still land; the infrastructure was slow.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReceiptTimeout { .. } | Self::IndexingTimeout { .. })
    }
}

/// Errors raised while projecting events into aggregates.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("{kind} on registry {registry_id} would drive the active count below zero")]
    CounterUnderflow { registry_id: String, kind: EventKind },

    #[error("{kind} is not a valid transition for a {registry_kind} registry ({registry_id})")]
    UnsupportedTransition {
        registry_id: String,
        registry_kind: RegistryKind,
        kind: EventKind,
    },

    #[error("registry {registry_id} is a {existing} registry, event claims {incoming}")]
    RegistryKindMismatch {
        registry_id: String,
        existing: RegistryKind,
        incoming: RegistryKind,
    },

    #[error("event at {got} on registry {registry_id} is not after last applied {last}")]
    OutOfOrder {
        registry_id: String,
        last: EventPosition,
        got: EventPosition,
    },

    #[error("reorg beyond confirmation depth at block {block_number}: expected parent {expected}, got {actual}")]
    ReorgBeyondConfirmation {
        block_number: u64,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Other(String),
}

impl ProjectionError {
    /// Returns `true` if the event itself is invalid for its registry. Such
    /// events are recorded as rejected instead of stopping the projection.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::CounterUnderflow { .. }
                | Self::UnsupportedTransition { .. }
                | Self::RegistryKindMismatch { .. }
        )
    }
}

impl From<FetchError> for ProjectionError {
    fn from(e: FetchError) -> Self {
        Self::Rpc(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_message_falls_back_to_generic() {
        let e = SettleError::Reverted {
            hash: "0xabc".into(),
            block_number: 7,
            reason: None,
        };
        assert!(e.to_string().contains(GENERIC_REVERT_REASON));
        assert!(e.is_rejection());
        assert!(!e.is_timeout());

        let e = SettleError::Reverted {
            hash: "0xabc".into(),
            block_number: 7,
            reason: Some("Ownable: caller is not the owner".into()),
        };
        assert!(e.to_string().ends_with("Ownable: caller is not the owner"));
    }

    #[test]
    fn timeouts_name_elapsed_seconds() {
        let e = SettleError::ReceiptTimeout {
            elapsed: Duration::from_millis(240_000),
            pending: 1,
            total: 2,
        };
        assert!(e.to_string().contains("240.0s"));
        assert!(e.is_timeout());

        let e = SettleError::IndexingTimeout {
            elapsed: Duration::from_millis(1_500),
            target: 12,
            last_seen: Some(9),
        };
        let msg = e.to_string();
        assert!(msg.contains("1.5s"));
        assert!(msg.contains("block 12"));
        assert!(msg.contains("last seen: 9"));
    }

    #[test]
    fn only_event_faults_are_invalid_transitions() {
        let underflow = ProjectionError::CounterUnderflow {
            registry_id: "0xr".into(),
            kind: EventKind::Revoked,
        };
        assert!(underflow.is_invalid_transition());
        assert!(!ProjectionError::Storage("disk full".into()).is_invalid_transition());
        assert!(!ProjectionError::OutOfOrder {
            registry_id: "0xr".into(),
            last: EventPosition { block_number: 2, log_index: 0 },
            got: EventPosition { block_number: 1, log_index: 0 },
        }
        .is_invalid_transition());
    }
}
