//! The single-edge upsert path (§4.2): `write` takes a caller-supplied
//! `Edge`, locks its source's metadata row, and either inserts a new row or
//! advances an existing one — never moving an edge backward in the
//! `(updated_at, state)` order (invariant 4).

use rand::Rng;
use tracing::instrument;

use crate::error::ExecutorError;
use crate::executor::{Executor, Param, QueryClass, Queryable};
use crate::model::{DestinationId, Edge, Metadata, SourceId, State};

use super::lifecycle::apply_count_delta;
use super::metadata::atomically;
use super::Tables;

/// How many times `insert_edge`/`update_edge` will nudge a colliding
/// `position` before giving up.
const MAX_POSITION_COLLISION_RETRIES: u32 = 8;

fn select_edge<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    destination_id: DestinationId,
) -> Result<Option<Edge>, ExecutorError> {
    let sql = format!(
        "SELECT source_id, destination_id, position, updated_at, count, state FROM {}
         WHERE source_id = ? AND destination_id = ?",
        tables.edges
    );
    txn.select_one(
        QueryClass::SelectModify,
        &sql,
        &[Param::from(source_id), Param::from(destination_id)],
        |row| {
            Ok(Edge {
                source_id: row.get_u64(0)?,
                destination_id: row.get_u64(1)?,
                position: row.get_i64(2)?,
                updated_at: row.get_u32(3)?,
                count: row.get_u8(4)?,
                state: row.get_state(5)?,
            })
        },
    )
}

/// Inserts a brand-new edge row. A `position` collision within the same
/// `(source_id, state)` is resolved by nudging the position forward a random
/// amount in `[1, 999]` and retrying — preserved verbatim from the original
/// allocator (§9) for wire compatibility.
/// TODO: replace with a deterministic probe once production position
/// hot-spots under concurrent inserts are characterized; a random offset can
/// still collide repeatedly under sustained contention on one source.
fn insert_edge<Q: Queryable>(txn: &Q, tables: &Tables, shard_id: &str, mut edge: Edge) -> Result<Edge, ExecutorError> {
    let sql = format!(
        "INSERT INTO {} (source_id, state, position, destination_id, updated_at, count) VALUES (?, ?, ?, ?, ?, ?)",
        tables.edges
    );
    for _ in 0..MAX_POSITION_COLLISION_RETRIES {
        let result = txn.execute(
            &sql,
            &[
                Param::from(edge.source_id),
                Param::from(edge.state),
                Param::I64(edge.position),
                Param::from(edge.destination_id),
                Param::from(edge.updated_at),
                Param::from(edge.count),
            ],
        );
        match result {
            Ok(_) => return Ok(edge),
            Err(ExecutorError::IntegrityViolation { .. }) => {
                crate::metrics::POSITION_COLLISIONS_TOTAL.with_label_values(&[shard_id]).inc();
                edge.position = edge.position.wrapping_add(rand::rng().random_range(1..=999));
            }
            Err(e) => return Err(e),
        }
    }
    Err(position_collision_exhausted(&edge))
}

/// Advances an existing edge row in place, same collision handling as
/// `insert_edge`. Per §4.2, an update always stores `count = 0` on the row —
/// only `insert_edge` ever writes a nonzero per-row count — and only
/// *reactivates* the position: when `existing.state = Archived` and
/// `edge.state = Normal`, `position` is replaced with the incoming value
/// (S4); every other transition keeps `existing.position` untouched.
///
/// §4.2's prose states the opposite guard (`old.state ≠ Archived`), which
/// would keep the position fixed on exactly the transition S4 demonstrates
/// replacing it — read literally it contradicts its own worked example, so
/// this implementation follows S4 (see DESIGN.md).
fn update_edge<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    shard_id: &str,
    existing: Edge,
    mut edge: Edge,
) -> Result<Edge, ExecutorError> {
    let replace_position = existing.state == State::Archived && edge.state == State::Normal;
    if !replace_position {
        edge.position = existing.position;
    }
    edge.count = 0;

    let sql = format!(
        "UPDATE {} SET state = ?, position = ?, updated_at = ?, count = ?
         WHERE source_id = ? AND destination_id = ?",
        tables.edges
    );
    for _ in 0..MAX_POSITION_COLLISION_RETRIES {
        let result = txn.execute(
            &sql,
            &[
                Param::from(edge.state),
                Param::I64(edge.position),
                Param::from(edge.updated_at),
                Param::from(edge.count),
                Param::from(edge.source_id),
                Param::from(edge.destination_id),
            ],
        );
        match result {
            Ok(_) => return Ok(edge),
            Err(ExecutorError::IntegrityViolation { .. }) => {
                crate::metrics::POSITION_COLLISIONS_TOTAL.with_label_values(&[shard_id]).inc();
                edge.position = edge.position.wrapping_add(rand::rng().random_range(1..=999));
            }
            Err(e) => return Err(e),
        }
    }
    Err(position_collision_exhausted(&edge))
}

fn position_collision_exhausted(edge: &Edge) -> ExecutorError {
    ExecutorError::Other(anyhow::anyhow!(
        "exhausted position-collision retries for source {} destination {}",
        edge.source_id,
        edge.destination_id
    ))
}

/// An edge counts toward `metadata.count` only while its state equals the
/// metadata's source-level state (§2 glossary, "metadata state"). This
/// computes the signed contribution a state transition `old -> new` makes to
/// that count, mirroring the original's `update_edge`/`write_edge` pairing
/// (§4.2): zero unless the edge crosses the metadata-state boundary, and
/// signed by which side of the boundary it lands on.
fn transition_delta(old_state: State, new_state: State, metadata_state: State) -> i32 {
    if new_state == old_state {
        return 0;
    }
    if new_state == metadata_state {
        1
    } else if old_state == metadata_state {
        -1
    } else {
        0
    }
}

/// The body of `write`, run with the source's metadata row already locked.
/// Idempotent and monotonic (invariant 4): an incoming edge whose
/// `(updated_at, state)` is no later than the stored row's is a no-op that
/// returns the stored row unchanged. Returns the written edge alongside the
/// signed contribution it makes to `metadata.count` (0 for a no-op).
///
/// Per §2/§4.2, a single edge write never advances `metadata.state` or
/// `metadata.updated_at` — those are the source-level watermark, touched
/// only by the source-arity lifecycle wrappers (`archive_source` et al.).
pub(crate) fn write_edge<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    shard_id: &str,
    metadata: &Metadata,
    edge: Edge,
) -> Result<(Edge, i32), ExecutorError> {
    match select_edge(txn, tables, edge.source_id, edge.destination_id)? {
        Some(existing) if edge.order_key() <= existing.order_key() => Ok((existing, 0)),
        Some(existing) => {
            let written = update_edge(txn, tables, shard_id, existing, edge)?;
            let delta = transition_delta(existing.state, written.state, metadata.state);
            Ok((written, delta))
        }
        None => {
            let written = insert_edge(txn, tables, shard_id, edge)?;
            let delta = if written.state == metadata.state { 1 } else { 0 };
            Ok((written, delta))
        }
    }
}

/// Writes one edge (§4.2): locks `edge.source_id`'s metadata row, then runs
/// `write_edge`, clamping the resulting count delta at zero (§4.2 step 3).
/// Retries on `ExecutorError::Deadlock` per the shard's configured retry
/// budget.
#[instrument(skip(executor, edge), fields(shard_id = %shard_id, source_id = %edge.source_id, destination_id = %edge.destination_id))]
pub(crate) fn write<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    max_deadlock_retries: u32,
    edge: Edge,
) -> Result<Edge, ExecutorError> {
    atomically(executor, tables, shard_id, max_deadlock_retries, edge.source_id, |txn, metadata| {
        let (written, delta) = write_edge(txn, tables, shard_id, &metadata, edge)?;
        if delta != 0 {
            apply_count_delta(txn, tables, written.source_id, delta, true)?;
        }
        Ok(written)
    })
}
