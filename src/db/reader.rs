//! All read paths (§4.4): point lookups, per-source counts, forward-only
//! admin scans, and the bidirectionally paginated edge listings built on
//! [`super::query::paginate`].

use std::collections::HashMap;

use crate::cursor::{Cursor, ResultWindow, ScanCursor};
use crate::error::ExecutorError;
use crate::executor::{Param, QueryClass, Queryable, SqlRow};
use crate::model::{DestinationId, Edge, Metadata, SourceId, State};

use super::query::{self, OrderBy, StateFilter};
use super::Tables;

fn decode_edge(row: &impl SqlRow) -> Result<Edge, ExecutorError> {
    Ok(Edge {
        source_id: row.get_u64(0)?,
        destination_id: row.get_u64(1)?,
        position: row.get_i64(2)?,
        updated_at: row.get_u32(3)?,
        count: row.get_u8(4)?,
        state: row.get_state(5)?,
    })
}

/// Fetches one edge by its natural key, in whatever state it's in.
pub(crate) fn get<Q: Queryable>(
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
        QueryClass::Select,
        &sql,
        &[Param::from(source_id), Param::from(destination_id)],
        decode_edge,
    )
}


/// §4.4 `count(source, states)`: `metadata.count` if the source's
/// metadata-level state is one of `states`, else `0` — the metadata row
/// tracks exactly one state's count at a time (§2 glossary, "metadata
/// state"), so a query for any other state is answered as zero regardless of
/// how many edges actually sit in that state (see §8 scenario S2). If the
/// metadata row doesn't exist yet, it's lazily populated and the read is
/// retried once.
pub(crate) fn count<Q: Queryable>(txn: &Q, tables: &Tables, source_id: SourceId, states: &[State]) -> Result<i32, ExecutorError> {
    let found = match select_metadata_state_count(txn, tables, source_id)? {
        Some(row) => row,
        None => {
            populate_missing_metadata(txn, tables, source_id)?;
            select_metadata_state_count(txn, tables, source_id)?.unwrap_or((State::Normal, 0))
        }
    };
    let (metadata_state, metadata_count) = found;
    Ok(if states.contains(&metadata_state) { metadata_count } else { 0 })
}

/// Lazily materializes a missing metadata row for a bare (non-transactional)
/// read path, mirroring §4.1's "ignore unique-violation races" rule: a
/// concurrent reader may have inserted the row first, which is not an error
/// here, just a race the caller's retry-once already accounts for.
fn populate_missing_metadata<Q: Queryable>(txn: &Q, tables: &Tables, source_id: SourceId) -> Result<(), ExecutorError> {
    let scan_sql = format!("SELECT COUNT(*) FROM {} WHERE source_id = ? AND state = ?", tables.edges);
    let scanned_count = txn
        .select_one(QueryClass::Select, &scan_sql, &[Param::from(source_id), Param::from(State::Normal)], |row| {
            row.get_i64(0)
        })?
        .unwrap_or(0);
    let insert_sql = format!(
        "INSERT INTO {} (source_id, count, state, updated_at) VALUES (?, ?, ?, ?)",
        tables.metadata
    );
    match txn.execute(&insert_sql, &[Param::from(source_id), Param::I64(scanned_count), Param::from(State::Normal), Param::from(0u32)]) {
        Ok(_) => Ok(()),
        Err(ExecutorError::IntegrityViolation { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

fn select_metadata_state_count<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
) -> Result<Option<(State, i32)>, ExecutorError> {
    let sql = format!("SELECT state, count FROM {} WHERE source_id = ?", tables.metadata);
    txn.select_one(QueryClass::Select, &sql, &[Param::from(source_id)], |row| {
        Ok((row.get_state(0)?, row.get_i64(1)? as i32))
    })
}

/// Batched form of `count` (§4.4): fills `source_id -> metadata.count` for
/// every row that exists. Sources with no metadata row are left absent from
/// the map rather than defaulting to `0`.
pub(crate) fn counts<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_ids: &[SourceId],
) -> Result<HashMap<SourceId, i32>, ExecutorError> {
    let mut out = HashMap::with_capacity(source_ids.len());
    if source_ids.is_empty() {
        return Ok(out);
    }
    let placeholders = source_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT source_id, count FROM {} WHERE source_id IN ({placeholders})",
        tables.metadata
    );
    let params: Vec<Param> = source_ids.iter().map(|id| Param::from(*id)).collect();
    let rows = txn.select(QueryClass::Select, &sql, &params, |row| {
        Ok((row.get_u64(0)?, row.get_i64(1)? as i32))
    })?;
    for (source_id, count) in rows {
        out.insert(source_id, count);
    }
    Ok(out)
}

/// Forward-only scan over every metadata row, ordered by `source_id` — an
/// admin/backup path, not a client-facing query.
pub(crate) fn select_all_metadata<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    cursor: ScanCursor<SourceId>,
    limit: usize,
) -> Result<(Vec<Metadata>, ScanCursor<SourceId>), ExecutorError> {
    if limit == 0 || cursor.is_end() {
        return Ok((Vec::new(), ScanCursor::End));
    }
    let mut params = Vec::new();
    let predicate = match cursor {
        ScanCursor::Start => "",
        ScanCursor::After(id) => {
            params.push(Param::from(id));
            "WHERE source_id > ?"
        }
        ScanCursor::End => unreachable!("handled above"),
    };
    let sql = format!(
        "SELECT source_id, count, state, updated_at FROM {} {predicate} ORDER BY source_id ASC LIMIT ?",
        tables.metadata
    );
    params.push(Param::I64(limit as i64 + 1));
    let mut rows = txn.select(QueryClass::Select, &sql, &params, |row| {
        Ok(Metadata {
            source_id: row.get_u64(0)?,
            count: row.get_i64(1)? as i32,
            state: row.get_state(2)?,
            updated_at: row.get_u32(3)?,
        })
    })?;
    let next = if rows.len() > limit {
        rows.truncate(limit);
        ScanCursor::After(rows.last().expect("truncated to a non-empty page").source_id)
    } else {
        ScanCursor::End
    };
    Ok((rows, next))
}

/// Forward-only scan over every edge row, ordered by `(source_id,
/// destination_id)` — an admin/backup path, not a client-facing query.
pub(crate) fn select_all<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    cursor: ScanCursor<(SourceId, DestinationId)>,
    limit: usize,
) -> Result<(Vec<Edge>, ScanCursor<(SourceId, DestinationId)>), ExecutorError> {
    if limit == 0 || cursor.is_end() {
        return Ok((Vec::new(), ScanCursor::End));
    }
    let mut params = Vec::new();
    let predicate = match cursor {
        ScanCursor::Start => "",
        ScanCursor::After((s, d)) => {
            params.push(Param::from(s));
            params.push(Param::from(s));
            params.push(Param::from(d));
            "WHERE source_id > ? OR (source_id = ? AND destination_id > ?)"
        }
        ScanCursor::End => unreachable!("handled above"),
    };
    let sql = format!(
        "SELECT source_id, destination_id, position, updated_at, count, state FROM {} {predicate}
         ORDER BY source_id ASC, destination_id ASC LIMIT ?",
        tables.edges
    );
    params.push(Param::I64(limit as i64 + 1));
    let mut rows = txn.select(QueryClass::Select, &sql, &params, decode_edge)?;
    let next = if rows.len() > limit {
        rows.truncate(limit);
        let last = rows.last().expect("truncated to a non-empty page");
        ScanCursor::After((last.source_id, last.destination_id))
    } else {
        ScanCursor::End
    };
    Ok((rows, next))
}

fn to_edge(source_id: SourceId, row: query::EdgeRow) -> Edge {
    Edge {
        source_id,
        destination_id: row.destination_id,
        position: row.position,
        updated_at: row.updated_at,
        count: row.count,
        state: row.state,
    }
}

/// The bidirectionally paginated edge listing (§4.4), parameterized by which
/// column to order by and which states to include.
fn paginate_edges<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    order_by: OrderBy,
    states: &[State],
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<Edge>, ExecutorError> {
    let window = query::paginate(txn, tables, source_id, order_by, states, cursor, limit)?;
    Ok(ResultWindow {
        page: window.page.into_iter().map(|row| to_edge(source_id, row)).collect(),
        prev_cursor: window.prev_cursor,
        next_cursor: window.next_cursor,
    })
}

/// Paginated listing over `Normal`/`Removed` edges only, ordered by
/// `position` (the primary-key index) — the default view.
pub(crate) fn select_by_position<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<Edge>, ExecutorError> {
    paginate_edges(txn, tables, source_id, OrderBy::Position, StateFilter::Active.states(), cursor, limit)
}

/// Paginated listing over `Normal`/`Removed` edges, ordered by
/// `destination_id` (the `(source_id, destination_id)` index) rather than
/// `position` — §4.4's `select_by_destination_id`.
pub(crate) fn select_by_destination_id<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<Edge>, ExecutorError> {
    paginate_edges(txn, tables, source_id, OrderBy::DestinationId, StateFilter::Active.states(), cursor, limit)
}

/// Paginated listing with the `state ≠ Removed` predicate (§4.4), ordered by
/// `destination_id` — surfaces `Archived` and `Negative` edges that
/// `select_by_position`/`select_by_destination_id` exclude, while still
/// hiding tombstones.
pub(crate) fn select_including_archived<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<Edge>, ExecutorError> {
    paginate_edges(txn, tables, source_id, OrderBy::DestinationId, StateFilter::NotRemoved.states(), cursor, limit)
}

/// §4.4 `select_edges(source, states, count, cursor)`: like
/// `select_by_position` but over a caller-supplied state set rather than the
/// fixed `Active` preset, ordered by `position`.
pub(crate) fn select_edges<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    states: &[State],
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<Edge>, ExecutorError> {
    paginate_edges(txn, tables, source_id, OrderBy::Position, states, cursor, limit)
}

/// §4.4 `intersect_edges(source, states, destination_ids)`: rows matching
/// any of `destination_ids` and any of `states`, ordered `destination_id
/// DESC`. Empty input returns empty without a round trip.
pub(crate) fn intersect_edges<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    states: &[State],
    destination_ids: &[DestinationId],
) -> Result<Vec<Edge>, ExecutorError> {
    if destination_ids.is_empty() || states.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = destination_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT source_id, destination_id, position, updated_at, count, state FROM {}
         WHERE source_id = ? AND destination_id IN ({placeholders}) AND state IN ({})
         ORDER BY destination_id DESC",
        tables.edges,
        query::states_in_clause(states),
    );
    let mut params = vec![Param::from(source_id)];
    params.extend(destination_ids.iter().map(|d| Param::from(*d)));
    txn.select(QueryClass::Select, &sql, &params, decode_edge)
}

/// Like `intersect_edges`, but just the matching ids.
pub(crate) fn intersect<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    states: &[State],
    destination_ids: &[DestinationId],
) -> Result<Vec<DestinationId>, ExecutorError> {
    Ok(intersect_edges(txn, tables, source_id, states, destination_ids)?
        .into_iter()
        .map(|e| e.destination_id)
        .collect())
}
