//! The bidirectional paginated query builder (§4.4 paging protocol).

use crate::cursor::{Cursor, ResultWindow};
use crate::error::ExecutorError;
use crate::executor::{Param, QueryClass, Queryable, SqlRow};
use crate::model::{DestinationId, SourceId, State};

use super::Tables;

/// Which states a read should consider. Most reads exclude tombstoned and
/// superseded rows; a few callers (`select_including_archived`, admin scans)
/// widen the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateFilter {
    Active,
    /// §4.4 `select_including_archived`'s predicate: `state ≠ Removed`.
    NotRemoved,
    All,
}

impl StateFilter {
    pub(crate) fn states(self) -> &'static [State] {
        match self {
            StateFilter::Active => &[State::Normal, State::Removed],
            StateFilter::NotRemoved => &[State::Normal, State::Archived, State::Negative],
            StateFilter::All => &[State::Normal, State::Removed, State::Archived, State::Negative],
        }
    }

    pub(crate) fn in_clause(self) -> String {
        states_in_clause(self.states())
    }
}

/// Builds a SQL `IN (...)` list from an arbitrary state set — used both by
/// the fixed `StateFilter` presets and by `select_edges`, whose `states`
/// argument is caller-supplied (§4.4) rather than one of the presets.
pub(crate) fn states_in_clause(states: &[State]) -> String {
    states.iter().map(|s| s.wire_id().to_string()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeRow {
    pub destination_id: DestinationId,
    pub position: i64,
    pub updated_at: u32,
    pub count: u8,
    pub state: State,
}

fn decode_edge_row(row: &impl SqlRow) -> Result<EdgeRow, ExecutorError> {
    Ok(EdgeRow {
        destination_id: row.get_u64(0)?,
        position: row.get_i64(1)?,
        updated_at: row.get_u32(2)?,
        count: row.get_u8(3)?,
        state: row.get_state(4)?,
    })
}

/// Which column the bidirectional paging protocol orders by. §4.4 names two
/// distinct orderings sharing the same protocol: `select_by_position`
/// (primary-key order) and `select_by_destination_id` (the
/// `(source_id, destination_id)` index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderBy {
    Position,
    DestinationId,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            OrderBy::Position => "position",
            OrderBy::DestinationId => "destination_id",
        }
    }

    fn comparand(self, row: &EdgeRow) -> i64 {
        match self {
            OrderBy::Position => row.position,
            OrderBy::DestinationId => row.destination_id as i64,
        }
    }
}

/// Runs the bidirectional paging protocol: a page of up to `limit` rows plus
/// continuation cursors in both directions, fetched in one round trip.
///
/// `Start`/`Forward` walk the canonical direction — descending, `<order_by> <
/// p` — and return their page as fetched. `Backward` walks the other way —
/// ascending, `<order_by> > p` — and reverses its page back into canonical
/// (descending) order before returning it. Either way the page query
/// over-fetches one row to learn whether that same side continues. A second,
/// single-row probe checks the *other* side of the original anchor — the
/// page query alone never looks past where it started, so without the probe
/// we couldn't tell whether the opposite cursor should be a real
/// continuation or `End`.
pub(crate) fn paginate<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
    order_by: OrderBy,
    states: &[State],
    cursor: Cursor,
    limit: usize,
) -> Result<ResultWindow<EdgeRow>, ExecutorError> {
    if matches!(cursor, Cursor::End) || limit == 0 {
        return Ok(ResultWindow::empty());
    }

    let ascending = cursor.pages_backward();
    let anchor = cursor.comparand();
    let states = states_in_clause(states);
    let column = order_by.column();
    let page_cmp = if ascending { ">" } else { "<" };
    let page_order = if ascending { "ASC" } else { "DESC" };
    let probe_cmp = if ascending { "<" } else { ">" };
    let page_limit = limit as i64 + 1;

    let page_sql = format!(
        "SELECT destination_id, position, updated_at, count, state FROM {edges}
         WHERE source_id = ? AND state IN ({states}) AND {column} {page_cmp} ?
         ORDER BY {column} {page_order} LIMIT {page_limit}",
        edges = tables.edges,
    );
    let mut rows = txn.select(
        QueryClass::Select,
        &page_sql,
        &[Param::from(source_id), Param::I64(anchor)],
        decode_edge_row,
    )?;

    let more_same_side = rows.len() > limit;
    if more_same_side {
        rows.truncate(limit);
    }
    if ascending {
        rows.reverse();
    }

    let probe_sql = format!(
        "SELECT destination_id, position, updated_at, count, state FROM {edges}
         WHERE source_id = ? AND state IN ({states}) AND {column} {probe_cmp} ? LIMIT 1",
        edges = tables.edges,
    );
    let opposite_exists = txn
        .select_one(
            QueryClass::Select,
            &probe_sql,
            &[Param::from(source_id), Param::I64(anchor)],
            decode_edge_row,
        )?
        .is_some();

    // `more_same_side` always describes a continuation *away* from the
    // anchor; `opposite_exists` always describes a continuation *back
    // toward* it. Which of those is `next_cursor` vs `prev_cursor` depends
    // on which direction we just walked.
    let (prev_cursor, next_cursor) = if ascending {
        let prev = if more_same_side {
            Cursor::Backward(rows.first().map(|r| order_by.comparand(r)).unwrap_or(anchor))
        } else {
            Cursor::End
        };
        let next = if opposite_exists { Cursor::Forward(anchor) } else { Cursor::End };
        (prev, next)
    } else {
        let next = if more_same_side {
            Cursor::Forward(rows.last().map(|r| order_by.comparand(r)).unwrap_or(anchor))
        } else {
            Cursor::End
        };
        let prev = if opposite_exists { Cursor::Backward(anchor) } else { Cursor::End };
        (prev, next)
    };

    Ok(ResultWindow {
        page: rows,
        prev_cursor,
        next_cursor,
    })
}
