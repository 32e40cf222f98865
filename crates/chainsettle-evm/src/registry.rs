//! ERC-3643 registry log decoding.
//!
//! Maps `topics[0]` to `(RegistryKind, EventKind)`. The emitting contract is
//! the registry; its address (lower-cased) becomes the registry id.
//!
//! Claims are the exception. `ClaimRevoked` is emitted by the issuer, not by
//! the identity holding the claim, and only carries `keccak256(signature)` in
//! `topics[1]`. [`RegistryDecoder::claim_signature`] extracts that hash from
//! both `ClaimAdded` (from the data) and `ClaimRevoked` so the projection can
//! route the revocation to the identity. No other arguments are decoded.

use std::collections::HashMap;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use tiny_keccak::{Hasher, Keccak};
use tracing::warn;

use chainsettle_core::{EventKind, FetchError, RegistryEvent, RegistryKind};

use crate::fetcher::RawLog;

pub const CLAIM_ADDED: &str = "ClaimAdded(bytes32,uint256,uint256,address,bytes,bytes,string)";
pub const CLAIM_REVOKED: &str = "ClaimRevoked(bytes)";

/// Event signatures of the T-REX registries and the state transition each one is.
pub const ERC3643_EVENTS: &[(&str, RegistryKind, EventKind)] = &[
    ("ClaimTopicAdded(uint256)", RegistryKind::TopicScheme, EventKind::Added),
    ("ClaimTopicRemoved(uint256)", RegistryKind::TopicScheme, EventKind::Removed),
    ("TrustedIssuerAdded(address,uint256[])", RegistryKind::TrustedIssuer, EventKind::Added),
    ("TrustedIssuerRemoved(address)", RegistryKind::TrustedIssuer, EventKind::Removed),
    ("ModuleAdded(address)", RegistryKind::ComplianceModule, EventKind::Added),
    ("ModuleRemoved(address)", RegistryKind::ComplianceModule, EventKind::Removed),
    ("IdentityRegistered(address,address)", RegistryKind::Identity, EventKind::Added),
    ("IdentityRemoved(address,address)", RegistryKind::Identity, EventKind::Removed),
    (CLAIM_ADDED, RegistryKind::IdentityClaim, EventKind::Added),
    (
        "ClaimRemoved(bytes32,uint256,uint256,address,bytes,bytes,string)",
        RegistryKind::IdentityClaim,
        EventKind::Removed,
    ),
    (CLAIM_REVOKED, RegistryKind::IdentityClaim, EventKind::Revoked),
];

/// `keccak256(data)` as `0x`-prefixed lower-case hex.
pub fn keccak256_hex(data: &[u8]) -> String {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    format!("0x{}", hex::encode(out))
}

/// `keccak256(signature)` as a `0x`-prefixed lower-case hex topic.
pub fn topic0(signature: &str) -> String {
    keccak256_hex(signature.as_bytes())
}

/// The claim a log refers to, keyed by `keccak256(claim signature)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimSignature {
    /// `ClaimAdded` on an identity: link the hash to the emitting identity.
    Added(String),
    /// `ClaimRevoked` from an issuer: count it on the linked identity.
    Revoked(String),
}

/// Turns raw logs into [`RegistryEvent`]s.
#[derive(Debug, Clone)]
pub struct RegistryDecoder {
    by_topic: HashMap<String, (RegistryKind, EventKind)>,
    claim_added: String,
    claim_revoked: String,
}

impl Default for RegistryDecoder {
    fn default() -> Self {
        Self {
            by_topic: HashMap::new(),
            claim_added: topic0(CLAIM_ADDED),
            claim_revoked: topic0(CLAIM_REVOKED),
        }
    }
}

impl RegistryDecoder {
    /// Decoder for the standard ERC-3643 registry events.
    pub fn erc3643() -> Self {
        ERC3643_EVENTS
            .iter()
            .fold(Self::default(), |d, (sig, rk, ek)| d.with_event(sig, *rk, *ek))
    }

    /// Register one more event signature.
    pub fn with_event(mut self, signature: &str, registry_kind: RegistryKind, kind: EventKind) -> Self {
        self.by_topic.insert(topic0(signature), (registry_kind, kind));
        self
    }

    /// All known `topics[0]` values, for the `eth_getLogs` filter.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Classify a log. `Ok(None)` for events this decoder does not know.
    pub fn decode(&self, log: &RawLog, timestamp: i64) -> Result<Option<RegistryEvent>, FetchError> {
        let Some(topic) = log.topics.first() else {
            return Ok(None);
        };
        let Some(&(registry_kind, kind)) = self.by_topic.get(&topic.to_ascii_lowercase()) else {
            return Ok(None);
        };
        let block_number = log
            .block_number_u64()
            .ok_or_else(|| FetchError::Malformed(format!("bad blockNumber {:?}", log.block_number)))?;
        let log_index = log
            .log_index_u32()
            .ok_or_else(|| FetchError::Malformed(format!("bad logIndex {:?}", log.log_index)))?;

        Ok(Some(RegistryEvent {
            registry_id: log.address.to_ascii_lowercase(),
            registry_kind,
            kind,
            tx_hash: log.tx_hash.to_ascii_lowercase(),
            block_number,
            log_index,
            timestamp,
        }))
    }

    /// The claim signature hash carried by a claim log, if any.
    ///
    /// Undecodable claim data is logged and yields `None`; the event is still
    /// counted on its emitter.
    pub fn claim_signature(&self, log: &RawLog) -> Option<ClaimSignature> {
        let topic = log.topics.first()?.to_ascii_lowercase();
        if topic == self.claim_revoked {
            let hash = log.topics.get(1).map(|t| t.to_ascii_lowercase());
            if hash.is_none() {
                warn!(tx = %log.tx_hash, "ClaimRevoked without an indexed signature");
            }
            return hash.map(ClaimSignature::Revoked);
        }
        if topic != self.claim_added {
            return None;
        }
        match claim_added_signature(&log.data) {
            Some(signature) => Some(ClaimSignature::Added(keccak256_hex(&signature))),
            None => {
                warn!(tx = %log.tx_hash, log_index = %log.log_index, "undecodable ClaimAdded data");
                None
            }
        }
    }
}

/// The `signature` argument from `ClaimAdded`'s non-indexed data
/// `(uint256 scheme, bytes signature, bytes data, string uri)`.
fn claim_added_signature(data: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    let layout = DynSolType::Tuple(vec![
        DynSolType::Uint(256),
        DynSolType::Bytes,
        DynSolType::Bytes,
        DynSolType::String,
    ]);
    match layout.abi_decode_params(&bytes).ok()? {
        DynSolValue::Tuple(mut values) if values.len() == 4 => match values.swap_remove(1) {
            DynSolValue::Bytes(signature) => Some(signature),
            _ => None,
        },
        _ => None,
    }
}
