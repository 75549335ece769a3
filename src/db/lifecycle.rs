//! Lifecycle wrappers (§4.5): `add`/`negate`/`remove`/`archive`, each in an
//! edge arity (one `(source_id, destination_id)` pair) and a source arity
//! (every edge currently attributed to a source), plus the two metadata
//! helpers other modules build on: `apply_count_delta` (the writer and bulk
//! ingester's count-delta application, §4.2 step 3 / §4.3 step 5) and
//! `update_metadata` (the source-level state/watermark setter the
//! source-arity wrappers below call, §4.5).

use tracing::instrument;

use crate::error::{ExecutorError, TxError};
use crate::executor::{Executor, Param, Queryable};
use crate::model::{DestinationId, Edge, Metadata, SourceId, State};

use super::metadata::{atomically, with_lock};
use super::writer::write;
use super::Tables;

/// Adjusts the per-source edge count by `delta` (§4.2 step 3 / §4.3 step 5).
/// Lazily inserts the metadata row if it's missing —
/// `TxError::MissingMetadataRow` is caught here and never escapes further.
///
/// `clamp` selects between the single-edge writer's `GREATEST(count + delta,
/// 0)` guard and the bulk-copy path's unclamped `count + delta`, which
/// assumes non-negative totals by construction (§4.3 step 5, §9).
pub(crate) fn apply_count_delta<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    delta: i32,
    clamp: bool,
) -> Result<(), ExecutorError> {
    match apply_count_delta_once(txn, tables, source_id, delta, clamp) {
        Ok(()) => Ok(()),
        Err(TxError::MissingMetadataRow) => {
            let insert_sql = format!(
                "INSERT INTO {} (source_id, count, state, updated_at) VALUES (?, ?, ?, ?)",
                tables.metadata
            );
            txn.execute(
                &insert_sql,
                &[
                    Param::from(source_id),
                    Param::I64(delta.max(0) as i64),
                    Param::from(State::Normal),
                    Param::from(0u32),
                ],
            )?;
            Ok(())
        }
        Err(TxError::Executor(e)) => Err(e),
    }
}

fn apply_count_delta_once<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    delta: i32,
    clamp: bool,
) -> Result<(), TxError> {
    let sql = if clamp {
        format!("UPDATE {} SET count = MAX(count + ?, 0) WHERE source_id = ?", tables.metadata)
    } else {
        format!("UPDATE {} SET count = count + ? WHERE source_id = ?", tables.metadata)
    };
    let affected = txn.execute(&sql, &[Param::I64(delta as i64), Param::from(source_id)])?;
    if affected == 0 {
        return Err(TxError::MissingMetadataRow);
    }
    Ok(())
}

/// Monotonically advances the source-level `(state, updated_at)` watermark
/// (§4.5 `update_metadata`): a no-op if the row is already at or ahead of
/// `(updated_at, state)` per the same precedence rule edges themselves
/// follow (invariant 4). `count` is recomputed as a full `COUNT(*)` of the
/// source's edges now in `state`, exactly as §4.5 specifies ("acknowledged
/// as expensive" — this engine keeps the contract rather than caching it).
pub(crate) fn update_metadata<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    updated_at: u32,
    state: State,
) -> Result<(), ExecutorError> {
    let sql = format!(
        "UPDATE {metadata} SET state = ?, updated_at = ?,
             count = (SELECT COUNT(*) FROM {edges} WHERE source_id = ? AND state = ?)
         WHERE source_id = ? AND (updated_at < ? OR (updated_at = ? AND state <= ?))",
        metadata = tables.metadata,
        edges = tables.edges,
    );
    txn.execute(
        &sql,
        &[
            Param::from(state),
            Param::from(updated_at),
            Param::from(source_id),
            Param::from(state),
            Param::from(source_id),
            Param::from(updated_at),
            Param::from(updated_at),
            Param::from(state),
        ],
    )?;
    Ok(())
}

/// Writes a metadata row from scratch (§4.5 `write_metadata`): try an
/// unconditional insert first, and only pay for the locked, watermark-guarded
/// `UPDATE` when that insert collides with a row that already exists.
#[instrument(skip(executor), fields(shard_id = %shard_id, source_id = %metadata.source_id))]
pub(crate) fn write_metadata<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    metadata: Metadata,
) -> Result<(), ExecutorError> {
    let insert_sql = format!(
        "INSERT INTO {} (source_id, count, state, updated_at) VALUES (?, ?, ?, ?)",
        tables.metadata
    );
    let inserted = executor.execute(
        &insert_sql,
        &[
            Param::from(metadata.source_id),
            Param::I64(metadata.count as i64),
            Param::from(metadata.state),
            Param::from(metadata.updated_at),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(ExecutorError::IntegrityViolation { .. }) => with_lock(executor, retries, shard_id, |txn| {
            update_metadata(txn, tables, metadata.source_id, metadata.updated_at, metadata.state)
        }),
        Err(e) => Err(e),
    }
}

fn edge_arity<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    destination_id: DestinationId,
    position: i64,
    updated_at: u32,
    state: State,
) -> Result<Edge, ExecutorError> {
    let edge = Edge::new(source_id, destination_id, position, updated_at, state);
    write(executor, tables, shard_id, retries, edge)
}

/// Sets one edge to `Normal` (§3 lifecycle).
#[allow(clippy::too_many_arguments)]
pub(crate) fn add<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    destination_id: DestinationId,
    position: i64,
    updated_at: u32,
) -> Result<Edge, ExecutorError> {
    edge_arity(executor, tables, shard_id, retries, source_id, destination_id, position, updated_at, State::Normal)
}

/// Sets one edge to `Negative`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn negate<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    destination_id: DestinationId,
    position: i64,
    updated_at: u32,
) -> Result<Edge, ExecutorError> {
    edge_arity(executor, tables, shard_id, retries, source_id, destination_id, position, updated_at, State::Negative)
}

/// Sets one edge to `Removed`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn remove<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    destination_id: DestinationId,
    position: i64,
    updated_at: u32,
) -> Result<Edge, ExecutorError> {
    edge_arity(executor, tables, shard_id, retries, source_id, destination_id, position, updated_at, State::Removed)
}

/// Sets one edge to `Archived`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn archive<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    destination_id: DestinationId,
    position: i64,
    updated_at: u32,
) -> Result<Edge, ExecutorError> {
    edge_arity(executor, tables, shard_id, retries, source_id, destination_id, position, updated_at, State::Archived)
}

/// The source-arity form of the lifecycle ops (§4.5): advances the
/// source-level `(state, updated_at)` watermark and recounts, exactly like
/// `update_metadata`, and touches no edge row. A source-level archive/
/// remove/negate is a metadata-only operation — individual edges keep
/// whatever state they were last written in until something writes them
/// directly; only `count`/`state` at the source level move.
#[instrument(skip(executor), fields(shard_id = %shard_id, source_id = %source_id))]
fn apply_to_source<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    updated_at: u32,
    state: State,
) -> Result<(), ExecutorError> {
    with_lock(executor, retries, shard_id, |txn| update_metadata(txn, tables, source_id, updated_at, state))
}

/// Archives `source_id` at the metadata level (source arity of `archive`).
pub(crate) fn archive_source<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    updated_at: u32,
) -> Result<(), ExecutorError> {
    apply_to_source(executor, tables, shard_id, retries, source_id, updated_at, State::Archived)
}

/// Removes `source_id` at the metadata level (source arity of `remove`).
pub(crate) fn remove_source<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    updated_at: u32,
) -> Result<(), ExecutorError> {
    apply_to_source(executor, tables, shard_id, retries, source_id, updated_at, State::Removed)
}

/// Negates `source_id` at the metadata level (source arity of `negate`).
pub(crate) fn negate_source<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    retries: u32,
    source_id: SourceId,
    updated_at: u32,
) -> Result<(), ExecutorError> {
    apply_to_source(executor, tables, shard_id, retries, source_id, updated_at, State::Negative)
}
