//! Aggregate, snapshot and event types.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── RegistryKind ─────────────────────────────────────────────────────────────

/// The domain a registry belongs to. Decides which transitions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Claim topics required by a token.
    TopicScheme,
    /// Issuers trusted to sign claims.
    TrustedIssuer,
    /// Modules plugged into a compliance contract.
    ComplianceModule,
    /// Investor identities registered for a token.
    Identity,
    /// Claims held by an identity contract.
    IdentityClaim,
}

impl RegistryKind {
    /// Only identity claims can be revoked.
    pub fn supports_revocation(self) -> bool {
        matches!(self, Self::IdentityClaim)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopicScheme => "topic_scheme",
            Self::TrustedIssuer => "trusted_issuer",
            Self::ComplianceModule => "compliance_module",
            Self::Identity => "identity",
            Self::IdentityClaim => "identity_claim",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic_scheme" => Some(Self::TopicScheme),
            "trusted_issuer" => Some(Self::TrustedIssuer),
            "compliance_module" => Some(Self::ComplianceModule),
            "identity" => Some(Self::Identity),
            "identity_claim" => Some(Self::IdentityClaim),
            _ => None,
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── EventKind ────────────────────────────────────────────────────────────────

/// The state-changing transition an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Added / Registered.
    Added,
    Removed,
    Revoked,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

// ─── EventPosition / EventId ──────────────────────────────────────────────────

/// Where an event sits in chain order. Ordered by block, then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Stable identity of one emitted log: `(tx_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub tx_hash: String,
    pub log_index: u32,
}

impl EventId {
    pub fn new(tx_hash: impl Into<String>, log_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into().to_ascii_lowercase(),
            log_index,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

// ─── RegistryEvent ────────────────────────────────────────────────────────────

/// A decoded domain event, ready to project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    /// Registry the event mutates (emitting contract address, lower-cased).
    pub registry_id: String,
    pub registry_kind: RegistryKind,
    pub kind: EventKind,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl RegistryEvent {
    pub fn id(&self) -> EventId {
        EventId::new(&self.tx_hash, self.log_index)
    }

    pub fn position(&self) -> EventPosition {
        EventPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

// ─── Counters ─────────────────────────────────────────────────────────────────

/// Running totals for one registry.
///
/// Invariant: `active == added - removed - revoked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub added: u64,
    pub active: u64,
    pub removed: u64,
    pub revoked: u64,
}

impl Counters {
    /// Apply one transition. `None` if it would take `active` below zero.
    pub fn apply(self, kind: EventKind) -> Option<Self> {
        let mut next = self;
        match kind {
            EventKind::Added => {
                next.added += 1;
                next.active += 1;
            }
            EventKind::Removed => {
                next.active = next.active.checked_sub(1)?;
                next.removed += 1;
            }
            EventKind::Revoked => {
                next.active = next.active.checked_sub(1)?;
                next.revoked += 1;
            }
        }
        Some(next)
    }

    pub fn is_consistent(&self) -> bool {
        self.removed
            .checked_add(self.revoked)
            .and_then(|gone| self.added.checked_sub(gone))
            == Some(self.active)
    }
}

// ─── AggregateState ───────────────────────────────────────────────────────────

/// Mutable per-registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    pub registry_id: String,
    pub registry_kind: RegistryKind,
    pub counters: Counters,
    /// Position of the last applied event.
    pub last_position: Option<EventPosition>,
    /// Number of applied events; equals the number of snapshots.
    pub version: u64,
    /// Timestamp of the last applied event.
    pub updated_at: i64,
}

impl AggregateState {
    /// The all-zero state of a registry seen for the first time.
    pub fn new(registry_id: impl Into<String>, registry_kind: RegistryKind) -> Self {
        Self {
            registry_id: registry_id.into(),
            registry_kind,
            counters: Counters::default(),
            last_position: None,
            version: 0,
            updated_at: 0,
        }
    }
}

// ─── StatsSnapshot ────────────────────────────────────────────────────────────

/// Immutable copy of a registry's counters right after one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub registry_id: String,
    pub registry_kind: RegistryKind,
    /// 1-based creation order within the registry.
    pub sequence: u64,
    pub counters: Counters,
    /// The event that produced this snapshot.
    pub event_id: EventId,
    pub kind: EventKind,
    pub block_number: u64,
    pub log_index: u32,
    /// Timestamp of the triggering event.
    pub timestamp: i64,
}
