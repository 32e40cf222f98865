//! Projection loop against a scripted chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::U256;
use async_trait::async_trait;

use chainsettle_core::aggregate::{EventId, SnapshotRange};
use chainsettle_core::{
    AggregateStore, AggregationEngine, Counters, EventKind, FetchError, IndexerStatus,
    MemoryAggregateStore, MemoryPointerStore, PointerStore, ProjectionError,
};
use chainsettle_evm::registry::{keccak256_hex, topic0, CLAIM_ADDED, CLAIM_REVOKED};
use chainsettle_evm::{
    BlockSummary, ChainReader, LogFilter, ProjectionBuilder, ProjectionState, RawLog,
};

const REGISTRY: &str = "0x00000000000000000000000000000000000000aa";
const OTHER: &str = "0x00000000000000000000000000000000000000bb";
const IDENTITY: &str = "0x00000000000000000000000000000000000000cc";
const ISSUER: &str = "0x00000000000000000000000000000000000000dd";
const GENESIS_TS: i64 = 1_700_000_000;

#[derive(Default)]
struct ChainState {
    blocks: Vec<BlockSummary>,
    logs: Vec<RawLog>,
    head: u64,
    /// Added to `head` on every `block_number` call, capped at the last block.
    head_step: u64,
}

#[derive(Clone, Default)]
struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    fn with_blocks(last: u64, head: u64) -> Self {
        let blocks = (0..=last)
            .map(|n| BlockSummary {
                number: n,
                hash: format!("0xh{n}"),
                parent_hash: if n == 0 { "0x0".into() } else { format!("0xh{}", n - 1) },
                timestamp: GENESIS_TS + 12 * n as i64,
            })
            .collect();
        let chain = Self::default();
        {
            let mut s = chain.state.lock().unwrap();
            s.blocks = blocks;
            s.head = head;
        }
        chain
    }

    fn emit(&self, address: &str, signature: &str, block: u64, log_index: u32) {
        self.emit_log(address, vec![topic0(signature)], "0x".into(), block, log_index);
    }

    fn emit_log(&self, address: &str, topics: Vec<String>, data: String, block: u64, log_index: u32) {
        self.state.lock().unwrap().logs.push(RawLog {
            address: address.into(),
            topics,
            data,
            block_number: format!("0x{block:x}"),
            block_hash: format!("0xh{block}"),
            tx_hash: format!("0xt{block}x{log_index}"),
            log_index: format!("0x{log_index:x}"),
            removed: None,
        });
    }

    fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    fn set_head_step(&self, step: u64) {
        self.state.lock().unwrap().head_step = step;
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> Result<u64, FetchError> {
        let mut s = self.state.lock().unwrap();
        let head = s.head;
        let last = s.blocks.len() as u64 - 1;
        s.head = (s.head + s.head_step).min(last);
        Ok(head)
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, FetchError> {
        Ok(self.state.lock().unwrap().blocks.get(number as usize).cloned())
    }

    async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, FetchError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| {
                let n = l.block_number_u64().unwrap_or(0);
                n >= from && n <= to && filter.matches(l)
            })
            .cloned()
            .collect())
    }
}

struct Stores {
    engine: Arc<AggregationEngine>,
    aggregates: Arc<MemoryAggregateStore>,
    pointers: Arc<MemoryPointerStore>,
}

fn stores() -> Stores {
    let aggregates = Arc::new(MemoryAggregateStore::new());
    Stores {
        engine: Arc::new(AggregationEngine::new(aggregates.clone())),
        aggregates,
        pointers: Arc::new(MemoryPointerStore::new()),
    }
}

/// Non-indexed `ClaimAdded` data: `(scheme, signature, data, uri)`.
fn claim_data(signature: &[u8]) -> String {
    let value = DynSolValue::Tuple(vec![
        DynSolValue::Uint(U256::from(1u8), 256),
        DynSolValue::Bytes(signature.to_vec()),
        DynSolValue::Bytes(Vec::new()),
        DynSolValue::String(String::new()),
    ]);
    format!("0x{}", hex::encode(value.abi_encode_params()))
}

const ADDED: &str = "IdentityRegistered(address,address)";
const REMOVED: &str = "IdentityRemoved(address,address)";

#[tokio::test]
async fn backfill_projects_confirmed_events_and_stops() {
    let chain = MockChain::with_blocks(30, 20);
    chain.emit(REGISTRY, ADDED, 5, 0);
    chain.emit(REGISTRY, ADDED, 7, 2);
    chain.emit(REGISTRY, REMOVED, 12, 1);
    chain.emit(REGISTRY, ADDED, 17, 0); // past to_block

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(2)
        .batch_size(4)
        .to_block(15)
        .build(chain, s.engine.clone(), s.pointers.clone());

    projection.run().await.unwrap();
    assert_eq!(projection.state(), ProjectionState::Stopped);
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 15);

    let agg = s.engine.aggregate(REGISTRY).await.unwrap().unwrap();
    assert_eq!(agg.counters.added, 2);
    assert_eq!(agg.counters.removed, 1);
    assert_eq!(agg.counters.active, 1);

    let snaps = s.engine.snapshots(REGISTRY, SnapshotRange::all()).await.unwrap();
    assert_eq!(snaps.len(), 3);
    assert_eq!(snaps[0].timestamp, GENESIS_TS + 60);
    assert_eq!(snaps[2].kind, EventKind::Removed);
    assert_eq!(snaps[2].block_number, 12);
}

#[tokio::test]
async fn only_watched_addresses_are_projected() {
    let chain = MockChain::with_blocks(10, 10);
    chain.emit(REGISTRY, ADDED, 3, 0);
    chain.emit(OTHER, ADDED, 4, 0);

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(10)
        .address(REGISTRY.to_ascii_uppercase().replacen("0X", "0x", 1))
        .build(chain, s.engine.clone(), s.pointers.clone());
    projection.run().await.unwrap();

    assert!(s.engine.aggregate(REGISTRY).await.unwrap().is_some());
    assert!(s.engine.aggregate(OTHER).await.unwrap().is_none());
}

#[tokio::test]
async fn restart_resumes_without_double_counting() {
    let chain = MockChain::with_blocks(30, 30);
    chain.emit(REGISTRY, ADDED, 5, 0);
    chain.emit(REGISTRY, ADDED, 19, 0);

    let s = stores();
    ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(10)
        .build(chain.clone(), s.engine.clone(), s.pointers.clone())
        .run()
        .await
        .unwrap();

    // Same stores, later end block: picks up at 11.
    ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(20)
        .build(chain.clone(), s.engine.clone(), s.pointers.clone())
        .run()
        .await
        .unwrap();

    let agg = s.engine.aggregate(REGISTRY).await.unwrap().unwrap();
    assert_eq!(agg.counters.added, 2);
    assert_eq!(agg.version, 2);

    // Lost pointer: the whole range is replayed and every event is a duplicate.
    let fresh_pointers = Arc::new(MemoryPointerStore::new());
    ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(20)
        .build(chain, s.engine.clone(), fresh_pointers.clone())
        .run()
        .await
        .unwrap();

    let agg = s.engine.aggregate(REGISTRY).await.unwrap().unwrap();
    assert_eq!(agg.counters.added, 2);
    assert_eq!(s.engine.snapshots(REGISTRY, SnapshotRange::all()).await.unwrap().len(), 2);
    let cp = fresh_pointers.load("ethereum", "registries").await.unwrap().unwrap();
    assert_eq!(cp.block_number, 20);
    assert_eq!(cp.block_hash, "0xh20");
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_blocks_wait_for_depth() {
    let chain = MockChain::with_blocks(20, 10);
    chain.emit(REGISTRY, ADDED, 8, 0);

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(5)
        .poll_interval_ms(1000)
        .build(chain.clone(), s.engine.clone(), s.pointers.clone());

    // Head stays at 10: only blocks up to 5 are confirmed and the loop idles in live mode.
    let idle = tokio::time::timeout(Duration::from_secs(10), projection.run()).await;
    assert!(idle.is_err());
    assert_eq!(projection.state(), ProjectionState::Live);
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 5);
    assert!(s.engine.aggregate(REGISTRY).await.unwrap().is_none());

    chain.set_head(14);
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(5)
        .poll_interval_ms(1000)
        .to_block(9)
        .build(chain, s.engine.clone(), s.pointers.clone());
    projection.run().await.unwrap();
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 9);
    assert_eq!(
        s.engine.aggregate(REGISTRY).await.unwrap().unwrap().counters.active,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn live_mode_follows_new_blocks() {
    let chain = MockChain::with_blocks(20, 10);
    chain.set_head_step(1);
    chain.emit(REGISTRY, ADDED, 4, 0);
    chain.emit(REGISTRY, ADDED, 11, 0);
    chain.emit(REGISTRY, REMOVED, 11, 1);

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(2)
        .poll_interval_ms(500)
        .to_block(12)
        .build(chain, s.engine.clone(), s.pointers.clone());
    projection.run().await.unwrap();

    assert_eq!(projection.state(), ProjectionState::Stopped);
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 12);
    let agg = s.engine.aggregate(REGISTRY).await.unwrap().unwrap();
    assert_eq!(agg.counters.added, 2);
    assert_eq!(agg.counters.active, 1);
}

#[tokio::test(start_paused = true)]
async fn reorg_past_confirmation_stops_the_loop() {
    let chain = MockChain::with_blocks(20, 10);
    chain.set_head_step(1);
    chain.state.lock().unwrap().blocks[9].parent_hash = "0xforked".into();

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(2)
        .poll_interval_ms(500)
        .build(chain, s.engine.clone(), s.pointers.clone());

    match projection.run().await {
        Err(ProjectionError::ReorgBeyondConfirmation {
            block_number,
            expected,
            actual,
        }) => {
            assert_eq!(block_number, 9);
            assert_eq!(expected, "0xh8");
            assert_eq!(actual, "0xforked");
        }
        other => panic!("expected reorg error, got {other:?}"),
    }
    assert_eq!(projection.state(), ProjectionState::Error);
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 8);
}

#[tokio::test]
async fn removed_logs_are_ignored() {
    let chain = MockChain::with_blocks(10, 10);
    chain.emit(REGISTRY, ADDED, 2, 0);
    chain.emit(REGISTRY, ADDED, 3, 0);
    chain.state.lock().unwrap().logs[1].removed = Some(true);

    let s = stores();
    ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(10)
        .build(chain, s.engine.clone(), s.pointers.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(
        s.engine.aggregate(REGISTRY).await.unwrap().unwrap().counters.added,
        1
    );
}

#[tokio::test]
async fn invalid_transition_is_recorded_and_skipped() {
    let chain = MockChain::with_blocks(10, 10);
    chain.emit(REGISTRY, REMOVED, 2, 0);
    chain.emit(OTHER, ADDED, 2, 1);
    chain.emit(REGISTRY, ADDED, 5, 0);

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(0)
        .batch_size(3)
        .to_block(10)
        .build(chain, s.engine.clone(), s.pointers.clone());

    projection.run().await.unwrap();
    assert_eq!(projection.state(), ProjectionState::Stopped);
    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 10);

    let agg = s.engine.aggregate(REGISTRY).await.unwrap().unwrap();
    assert_eq!(agg.counters, Counters { added: 1, active: 1, removed: 0, revoked: 0 });
    assert!(s.engine.aggregate(OTHER).await.unwrap().is_some());

    let rejected = EventId::new("0xt2x0", 0);
    assert!(s.aggregates.is_applied(&rejected).await.unwrap());
    assert!(s.aggregates.rejection(&rejected).unwrap().contains("below zero"));
}

#[tokio::test]
async fn issuer_revocation_lands_on_the_identity() {
    let signature = [0x42_u8; 65];
    let chain = MockChain::with_blocks(10, 10);
    chain.emit_log(
        IDENTITY,
        vec![
            topic0(CLAIM_ADDED),
            keccak256_hex(b"claim-id"),
            format!("0x{:064x}", 7),
            format!("0x{:0>64}", ISSUER.trim_start_matches("0x")),
        ],
        claim_data(&signature),
        2,
        0,
    );
    chain.emit_log(
        ISSUER,
        vec![topic0(CLAIM_REVOKED), keccak256_hex(&signature)],
        "0x".into(),
        4,
        0,
    );
    chain.emit(OTHER, ADDED, 6, 0);

    let s = stores();
    for round in 0..2 {
        // second round: restart on the same stores with a lost pointer
        let pointers = if round == 0 { s.pointers.clone() } else { Arc::new(MemoryPointerStore::new()) };
        let mut projection = ProjectionBuilder::new()
            .confirmation_depth(0)
            .batch_size(3)
            .to_block(10)
            .build(chain.clone(), s.engine.clone(), pointers);
        projection.run().await.unwrap();
        assert_eq!(projection.pointer().indexed_block().await.unwrap(), 10);

        let identity = s.engine.aggregate(IDENTITY).await.unwrap().unwrap();
        assert_eq!(
            identity.counters,
            Counters { added: 1, active: 0, removed: 0, revoked: 1 },
            "round {round}"
        );
        assert_eq!(identity.version, 2);
        assert!(s.engine.aggregate(ISSUER).await.unwrap().is_none());
        assert!(s.engine.aggregate(OTHER).await.unwrap().is_some());
    }

    let snaps = s.engine.snapshots(IDENTITY, SnapshotRange::all()).await.unwrap();
    assert_eq!(snaps.iter().map(|s| s.kind).collect::<Vec<_>>(), vec![EventKind::Added, EventKind::Revoked]);
    assert_eq!(snaps[1].block_number, 4);
}

#[tokio::test]
async fn revocation_of_an_unknown_claim_is_skipped() {
    let chain = MockChain::with_blocks(10, 10);
    chain.emit_log(
        ISSUER,
        vec![topic0(CLAIM_REVOKED), keccak256_hex(b"never added")],
        "0x".into(),
        3,
        0,
    );

    let s = stores();
    let mut projection = ProjectionBuilder::new()
        .confirmation_depth(0)
        .to_block(10)
        .build(chain, s.engine.clone(), s.pointers.clone());
    projection.run().await.unwrap();

    assert_eq!(projection.pointer().indexed_block().await.unwrap(), 10);
    assert!(s.engine.aggregate(ISSUER).await.unwrap().is_none());
}
