//! SQLite storage backend.
//!
//! One file holds the aggregates, the append-only snapshot series, the set of
//! applied event ids (with the reasons for rejected ones), the claim links and
//! the block pointers. Uses `sqlx` with WAL mode so
//! readers (the `wait` and `stats` commands) do not block the projection.
//!
//! # Usage
//! ```rust,no_run
//! use chainsettle_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./settle.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainsettle_core::aggregate::{
    AggregateCommit, CommitOutcome, EventId, EventPosition, LoadedAggregate, SnapshotRange,
};
use chainsettle_core::{
    AggregateState, AggregateStore, Checkpoint, Counters, EventKind, PointerStore, ProjectionError,
    RegistryKind, StatsSnapshot,
};

fn storage_err(e: sqlx::Error) -> ProjectionError {
    ProjectionError::Storage(e.to_string())
}

/// SQLite-backed [`AggregateStore`] and [`PointerStore`].
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./settle.db"`) or a full
    /// SQLite URL (`"sqlite:./settle.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ProjectionError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection to `:memory:` would get its own empty
    /// database, so the pool is capped at one connection.
    pub async fn in_memory() -> Result<Self, ProjectionError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), ProjectionError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                indexer_id   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, indexer_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aggregates (
                registry_id    TEXT    PRIMARY KEY,
                registry_kind  TEXT    NOT NULL,
                added          INTEGER NOT NULL,
                active         INTEGER NOT NULL,
                removed        INTEGER NOT NULL,
                revoked        INTEGER NOT NULL,
                last_block     INTEGER,
                last_log_index INTEGER,
                version        INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                registry_id   TEXT    NOT NULL,
                sequence      INTEGER NOT NULL,
                registry_kind TEXT    NOT NULL,
                added         INTEGER NOT NULL,
                active        INTEGER NOT NULL,
                removed       INTEGER NOT NULL,
                revoked       INTEGER NOT NULL,
                tx_hash       TEXT    NOT NULL,
                log_index     INTEGER NOT NULL,
                kind          TEXT    NOT NULL,
                block_number  INTEGER NOT NULL,
                timestamp     INTEGER NOT NULL,
                PRIMARY KEY (registry_id, sequence)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots (registry_id, timestamp);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS applied_events (
                tx_hash   TEXT    NOT NULL,
                log_index INTEGER NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rejected_events (
                tx_hash   TEXT    NOT NULL,
                log_index INTEGER NOT NULL,
                reason    TEXT    NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS claim_links (
                signature_hash TEXT PRIMARY KEY,
                registry_id    TEXT NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Every aggregate, ordered by registry id.
    pub async fn aggregates(&self) -> Result<Vec<AggregateState>, ProjectionError> {
        let rows = sqlx::query("SELECT * FROM aggregates ORDER BY registry_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(aggregate_from_row).collect()
    }

    /// Total number of applied events across all registries.
    pub async fn applied_count(&self) -> Result<u64, ProjectionError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM applied_events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Number of events refused as invalid for their registry.
    pub async fn rejected_count(&self) -> Result<u64, ProjectionError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM rejected_events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn registry_kind(s: &str) -> Result<RegistryKind, ProjectionError> {
    RegistryKind::parse(s).ok_or_else(|| ProjectionError::Storage(format!("unknown registry kind {s:?}")))
}

fn event_kind(s: &str) -> Result<EventKind, ProjectionError> {
    match s {
        "added" => Ok(EventKind::Added),
        "removed" => Ok(EventKind::Removed),
        "revoked" => Ok(EventKind::Revoked),
        other => Err(ProjectionError::Storage(format!("unknown event kind {other:?}"))),
    }
}

fn counters_from_row(r: &SqliteRow) -> Counters {
    Counters {
        added: r.get::<i64, _>("added") as u64,
        active: r.get::<i64, _>("active") as u64,
        removed: r.get::<i64, _>("removed") as u64,
        revoked: r.get::<i64, _>("revoked") as u64,
    }
}

fn aggregate_from_row(r: &SqliteRow) -> Result<AggregateState, ProjectionError> {
    let last_block: Option<i64> = r.get("last_block");
    let last_log_index: Option<i64> = r.get("last_log_index");
    Ok(AggregateState {
        registry_id: r.get("registry_id"),
        registry_kind: registry_kind(r.get("registry_kind"))?,
        counters: counters_from_row(r),
        last_position: last_block.zip(last_log_index).map(|(b, l)| EventPosition {
            block_number: b as u64,
            log_index: l as u32,
        }),
        version: r.get::<i64, _>("version") as u64,
        updated_at: r.get("updated_at"),
    })
}

fn snapshot_from_row(r: &SqliteRow) -> Result<StatsSnapshot, ProjectionError> {
    let log_index = r.get::<i64, _>("log_index") as u32;
    Ok(StatsSnapshot {
        registry_id: r.get("registry_id"),
        registry_kind: registry_kind(r.get("registry_kind"))?,
        sequence: r.get::<i64, _>("sequence") as u64,
        counters: counters_from_row(r),
        event_id: EventId::new(r.get::<String, _>("tx_hash"), log_index),
        kind: event_kind(r.get("kind"))?,
        block_number: r.get::<i64, _>("block_number") as u64,
        log_index,
        timestamp: r.get("timestamp"),
    })
}

// ─── AggregateStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl AggregateStore for SqliteStorage {
    async fn load(&self, registry_id: &str) -> Result<LoadedAggregate, ProjectionError> {
        let row = sqlx::query("SELECT * FROM aggregates WHERE registry_id = ?")
            .bind(registry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(match row {
            Some(r) => LoadedAggregate::Found(aggregate_from_row(&r)?),
            None => LoadedAggregate::NotFound,
        })
    }

    async fn is_applied(&self, event_id: &EventId) -> Result<bool, ProjectionError> {
        let row = sqlx::query("SELECT 1 FROM applied_events WHERE tx_hash = ? AND log_index = ?")
            .bind(&event_id.tx_hash)
            .bind(event_id.log_index as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn commit(&self, commit: AggregateCommit) -> Result<CommitOutcome, ProjectionError> {
        let AggregateCommit {
            event_id,
            state,
            snapshot,
        } = commit;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let inserted = sqlx::query("INSERT OR IGNORE INTO applied_events (tx_hash, log_index) VALUES (?, ?)")
            .bind(&event_id.tx_hash)
            .bind(event_id.log_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        if inserted == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(CommitOutcome::Duplicate);
        }

        sqlx::query(
            "INSERT INTO aggregates
             (registry_id, registry_kind, added, active, removed, revoked,
              last_block, last_log_index, version, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(registry_id) DO UPDATE SET
                registry_kind  = excluded.registry_kind,
                added          = excluded.added,
                active         = excluded.active,
                removed        = excluded.removed,
                revoked        = excluded.revoked,
                last_block     = excluded.last_block,
                last_log_index = excluded.last_log_index,
                version        = excluded.version,
                updated_at     = excluded.updated_at",
        )
        .bind(&state.registry_id)
        .bind(state.registry_kind.as_str())
        .bind(state.counters.added as i64)
        .bind(state.counters.active as i64)
        .bind(state.counters.removed as i64)
        .bind(state.counters.revoked as i64)
        .bind(state.last_position.map(|p| p.block_number as i64))
        .bind(state.last_position.map(|p| p.log_index as i64))
        .bind(state.version as i64)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "INSERT INTO snapshots
             (registry_id, sequence, registry_kind, added, active, removed, revoked,
              tx_hash, log_index, kind, block_number, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.registry_id)
        .bind(snapshot.sequence as i64)
        .bind(snapshot.registry_kind.as_str())
        .bind(snapshot.counters.added as i64)
        .bind(snapshot.counters.active as i64)
        .bind(snapshot.counters.removed as i64)
        .bind(snapshot.counters.revoked as i64)
        .bind(&snapshot.event_id.tx_hash)
        .bind(snapshot.log_index as i64)
        .bind(snapshot.kind.to_string())
        .bind(snapshot.block_number as i64)
        .bind(snapshot.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!(
            registry = %state.registry_id,
            event = %event_id,
            version = state.version,
            "aggregate committed"
        );
        Ok(CommitOutcome::Committed)
    }

    async fn reject(&self, event_id: EventId, reason: &str) -> Result<CommitOutcome, ProjectionError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let inserted = sqlx::query("INSERT OR IGNORE INTO applied_events (tx_hash, log_index) VALUES (?, ?)")
            .bind(&event_id.tx_hash)
            .bind(event_id.log_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        if inserted == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(CommitOutcome::Duplicate);
        }

        sqlx::query("INSERT INTO rejected_events (tx_hash, log_index, reason) VALUES (?, ?, ?)")
            .bind(&event_id.tx_hash)
            .bind(event_id.log_index as i64)
            .bind(reason)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        debug!(event = %event_id, "rejection recorded");
        Ok(CommitOutcome::Committed)
    }

    async fn link_claim(&self, signature_hash: &str, registry_id: &str) -> Result<(), ProjectionError> {
        sqlx::query(
            "INSERT INTO claim_links (signature_hash, registry_id) VALUES (?, ?)
             ON CONFLICT(signature_hash) DO UPDATE SET registry_id = excluded.registry_id",
        )
        .bind(signature_hash.to_ascii_lowercase())
        .bind(registry_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn claim_registry(&self, signature_hash: &str) -> Result<Option<String>, ProjectionError> {
        let row = sqlx::query("SELECT registry_id FROM claim_links WHERE signature_hash = ?")
            .bind(signature_hash.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get("registry_id")))
    }

    async fn snapshots(
        &self,
        registry_id: &str,
        range: SnapshotRange,
    ) -> Result<Vec<StatsSnapshot>, ProjectionError> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots
             WHERE registry_id = ?
               AND (? IS NULL OR timestamp >= ?)
               AND (? IS NULL OR timestamp <= ?)
             ORDER BY sequence",
        )
        .bind(registry_id)
        .bind(range.from)
        .bind(range.from)
        .bind(range.to)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(snapshot_from_row).collect()
    }
}

// ─── PointerStore impl ───────────────────────────────────────────────────────

#[async_trait]
impl PointerStore for SqliteStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, ProjectionError> {
        let row = sqlx::query(
            "SELECT chain_id, indexer_id, block_number, block_hash, updated_at
             FROM checkpoints WHERE chain_id = ? AND indexer_id = ?",
        )
        .bind(chain_id)
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            chain_id: r.get("chain_id"),
            indexer_id: r.get("indexer_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<bool, ProjectionError> {
        let moved = sqlx::query(
            "INSERT INTO checkpoints
             (chain_id, indexer_id, block_number, block_hash, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chain_id, indexer_id) DO UPDATE SET
                block_number = excluded.block_number,
                block_hash   = excluded.block_hash,
                updated_at   = excluded.updated_at
             WHERE excluded.block_number > checkpoints.block_number",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected()
            > 0;

        if moved {
            debug!(
                chain_id = %checkpoint.chain_id,
                indexer_id = %checkpoint.indexer_id,
                block = checkpoint.block_number,
                "pointer saved"
            );
        }
        Ok(moved)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
