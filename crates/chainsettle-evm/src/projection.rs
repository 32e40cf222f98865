//! The projection loop: confirmed registry logs → aggregates → block pointer.
//!
//! # Backfill
//! From the resume point to `head - confirmation_depth` in batches of
//! `batch_size` blocks. Per batch: fetch logs, decode, sort into chain order,
//! attach block timestamps, apply, then advance the pointer to the batch end.
//!
//! # Live
//! Poll the head every `poll_interval_ms` and project one confirmed block at
//! a time, checking each header's parent hash against the previous one.
//!
//! The pointer only moves after a batch is fully applied. A crash mid-batch
//! replays the batch on restart; already-applied events are skipped by the
//! engine's event-id dedup. Events the engine rejects are recorded and
//! skipped, so they never hold the pointer back.
//!
//! # Claims
//! `ClaimAdded` links its signature hash to the emitting identity before the
//! batch is applied. A `ClaimRevoked` from an issuer is re-attributed to the
//! linked identity; a revocation of a claim never seen is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use chainsettle_core::aggregate::BatchSummary;
use chainsettle_core::{AggregationEngine, BlockPointer, ProjectionError};

use crate::config::{ProjectionConfig, ProjectionState};
use crate::fetcher::{BlockSummary, ChainReader, LogFilter};
use crate::registry::{ClaimSignature, RegistryDecoder};
use crate::tracker::BlockTracker;

pub struct ProjectionLoop<C: ChainReader> {
    config: ProjectionConfig,
    client: C,
    decoder: RegistryDecoder,
    filter: LogFilter,
    engine: Arc<AggregationEngine>,
    pointer: BlockPointer,
    tracker: BlockTracker,
    state: ProjectionState,
}

impl<C: ChainReader> ProjectionLoop<C> {
    pub fn new(
        config: ProjectionConfig,
        client: C,
        engine: Arc<AggregationEngine>,
        pointer: BlockPointer,
    ) -> Self {
        let decoder = RegistryDecoder::erc3643();
        let filter = LogFilter {
            addresses: config.addresses.iter().map(|a| a.to_ascii_lowercase()).collect(),
            topic0: decoder.topics(),
        };
        Self {
            config,
            client,
            decoder,
            filter,
            engine,
            pointer,
            tracker: BlockTracker::new(128),
            state: ProjectionState::Idle,
        }
    }

    pub fn state(&self) -> ProjectionState {
        self.state
    }

    /// The pointer this loop advances; hand it to an `IndexingWaiter`.
    pub fn pointer(&self) -> &BlockPointer {
        &self.pointer
    }

    /// Run until `to_block` is reached or an error occurs. Without a
    /// `to_block` this only returns on error.
    pub async fn run(&mut self) -> Result<(), ProjectionError> {
        let result = self.run_phases().await;
        if let Err(e) = &result {
            error!(error = %e, chain = %self.config.chain, "projection stopped");
            self.state = ProjectionState::Error;
        }
        result
    }

    async fn run_phases(&mut self) -> Result<(), ProjectionError> {
        let mut next = self.resume_point().await?;

        self.state = ProjectionState::Backfilling;
        let head = self.client.block_number().await?;
        if let Some(target) = self.target(head) {
            if target >= next {
                info!(from = next, target, "starting backfill");
                self.backfill(next, target).await?;
                next = target + 1;
            }
        }
        if self.finished(next) {
            self.state = ProjectionState::Stopped;
            return Ok(());
        }

        self.state = ProjectionState::Live;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            match self.live_step(next).await? {
                Some(done) => {
                    next = done + 1;
                    if self.finished(next) {
                        info!(at = done, "reached end block");
                        self.state = ProjectionState::Stopped;
                        return Ok(());
                    }
                }
                None => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    /// First block to project; seeds the tracker from the checkpoint.
    async fn resume_point(&mut self) -> Result<u64, ProjectionError> {
        match self.pointer.load().await? {
            Some(cp) => {
                info!(block = cp.block_number, hash = %cp.block_hash, "resuming from pointer");
                let _ = self.tracker.push(BlockSummary {
                    number: cp.block_number,
                    hash: cp.block_hash,
                    parent_hash: String::new(),
                    timestamp: 0,
                });
                Ok((cp.block_number + 1).max(self.config.from_block))
            }
            None => Ok(self.config.from_block),
        }
    }

    /// Highest block that may be projected right now.
    fn target(&self, head: u64) -> Option<u64> {
        let confirmed = self.config.confirmed_head(head)?;
        Some(match self.config.to_block {
            Some(to) => confirmed.min(to),
            None => confirmed,
        })
    }

    fn finished(&self, next: u64) -> bool {
        matches!(self.config.to_block, Some(to) if next > to)
    }

    async fn backfill(&mut self, from: u64, to: u64) -> Result<(), ProjectionError> {
        let batch = self.config.batch_size.max(1);
        let mut current = from;
        while current <= to {
            let batch_end = current.saturating_add(batch - 1).min(to);
            let end_block = self.header(batch_end).await?;
            self.track(end_block.clone())?;
            let summary = self.project_range(current, batch_end, &end_block).await?;
            info!(
                current,
                batch_end,
                target = to,
                projected = summary.projected,
                duplicates = summary.duplicates,
                rejected = summary.rejected,
                "backfill batch complete"
            );
            current = batch_end + 1;
        }
        info!(at = to, "backfill complete");
        Ok(())
    }

    /// Project block `next` if it is confirmed. `Ok(None)` when there is
    /// nothing to do yet.
    async fn live_step(&mut self, next: u64) -> Result<Option<u64>, ProjectionError> {
        let head = self.client.block_number().await?;
        match self.target(head) {
            Some(target) if next <= target => {}
            _ => return Ok(None),
        }
        let Some(block) = self.client.block(next).await? else {
            return Ok(None);
        };
        self.track(block.clone())?;
        let summary = self.project_range(next, next, &block).await?;
        debug!(block = next, projected = summary.projected, "live block projected");
        Ok(Some(next))
    }

    fn track(&mut self, block: BlockSummary) -> Result<(), ProjectionError> {
        let number = block.number;
        self.tracker
            .push(block)
            .map_err(|mismatch| ProjectionError::ReorgBeyondConfirmation {
                block_number: number,
                expected: mismatch.expected,
                actual: mismatch.actual,
            })
    }

    async fn header(&self, number: u64) -> Result<BlockSummary, ProjectionError> {
        self.client
            .block(number)
            .await?
            .ok_or_else(|| ProjectionError::Rpc(format!("block {number} not found")))
    }

    async fn project_range(
        &self,
        from: u64,
        to: u64,
        end_block: &BlockSummary,
    ) -> Result<BatchSummary, ProjectionError> {
        let logs = self.client.logs(from, to, &self.filter).await?;

        let mut decoded = Vec::new();
        for log in logs.iter().filter(|l| !l.is_removed() && self.filter.matches(l)) {
            if let Some(event) = self.decoder.decode(log, 0)? {
                decoded.push((event, self.decoder.claim_signature(log)));
            }
        }
        decoded.sort_by_key(|(e, _)| e.position());

        let store = self.engine.store();
        let mut events = Vec::with_capacity(decoded.len());
        for (mut event, claim) in decoded {
            match claim {
                Some(ClaimSignature::Added(hash)) => {
                    store.link_claim(&hash, &event.registry_id).await?;
                }
                Some(ClaimSignature::Revoked(hash)) => match store.claim_registry(&hash).await? {
                    Some(identity) => {
                        debug!(issuer = %event.registry_id, identity = %identity, "revocation attributed");
                        event.registry_id = identity;
                    }
                    None => {
                        warn!(
                            issuer = %event.registry_id,
                            signature = %hash,
                            block = event.block_number,
                            "revocation of an unknown claim skipped"
                        );
                        continue;
                    }
                },
                None => {}
            }
            events.push(event);
        }

        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        timestamps.insert(end_block.number, end_block.timestamp);
        for event in &mut events {
            event.timestamp = match timestamps.get(&event.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.header(event.block_number).await?.timestamp;
                    timestamps.insert(event.block_number, ts);
                    ts
                }
            };
        }

        let summary = self.engine.apply_batch(&events).await?;
        self.pointer.advance(to, &end_block.hash).await?;
        Ok(summary)
    }
}
