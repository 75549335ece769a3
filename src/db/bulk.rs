//! The bulk copy ingester (§4.3): accepts a sequence of edges grouped
//! contiguously by `source_id`, splits it back into per-source bursts, and
//! commits each burst in its own locked transaction. Within a burst, tries a
//! multi-row insert first and falls back to the regular single-edge write
//! path — with its monotonicity and position-collision handling intact —
//! for whatever rows the bulk insert couldn't place.

use tracing::instrument;

use crate::error::ExecutorError;
use crate::executor::{Executor, Param, Queryable};
use crate::model::{Edge, Metadata, SourceId};

use super::lifecycle::apply_count_delta;
use super::metadata::atomically;
use super::writer::write_edge;
use super::Tables;

/// The body of `write_copies`, run with the source locked (§4.3 step 2-3).
/// Attempts one multi-row `INSERT` for the whole burst; any row that failed
/// (a unique-constraint collision — it already exists, or raced a position)
/// is retried individually through `write_edge`, which knows how to update
/// an existing row or nudge a colliding position. Returns the written rows
/// alongside the cumulative signed contribution to `metadata.count` (§4.3
/// step 2/4: a bulk-inserted row counts only when its state equals the
/// locked metadata's state, same boundary rule the single-edge path uses).
///
/// Like the single-edge path, a burst never advances `metadata.state` or
/// `metadata.updated_at` — only the source-arity lifecycle wrappers do.
pub(crate) fn write_burst<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    shard_id: &str,
    metadata: &Metadata,
    edges: &[Edge],
) -> Result<(Vec<Edge>, i32), ExecutorError> {
    let sql = format!(
        "INSERT INTO {} (source_id, state, position, destination_id, updated_at, count) VALUES (?, ?, ?, ?, ?, ?)",
        tables.edges
    );
    let rows: Vec<Vec<Param>> = edges
        .iter()
        .map(|e| {
            vec![
                Param::from(e.source_id),
                Param::from(e.state),
                Param::I64(e.position),
                Param::from(e.destination_id),
                Param::from(e.updated_at),
                Param::from(e.count),
            ]
        })
        .collect();
    let statuses = txn.execute_batch(&sql, &rows)?;

    let mut written = Vec::with_capacity(edges.len());
    let mut delta: i32 = 0;
    let mut fallback_count: u64 = 0;

    for (edge, status) in edges.iter().zip(statuses.iter()) {
        if *status >= 0 {
            if edge.state == metadata.state {
                delta += 1;
            }
            written.push(*edge);
        } else {
            fallback_count += 1;
            let (result, edge_delta) = write_edge(txn, tables, shard_id, metadata, *edge)?;
            delta += edge_delta;
            written.push(result);
        }
    }

    if fallback_count > 0 {
        crate::metrics::BULK_BATCH_FALLBACK_TOTAL
            .with_label_values(&[shard_id])
            .inc_by(fallback_count);
    }

    Ok((written, delta))
}

/// Writes one contiguous same-source burst (§4.3 steps 1-5), locking that
/// source's metadata row for the duration.
#[instrument(skip(executor, edges), fields(shard_id = %shard_id, source_id = %source_id, burst_len = edges.len()))]
fn write_one_burst<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    max_deadlock_retries: u32,
    source_id: SourceId,
    edges: &[Edge],
) -> Result<Vec<Edge>, ExecutorError> {
    let timer = crate::metrics::BULK_BURST_DURATION_SECONDS
        .with_label_values(&[shard_id])
        .start_timer();
    let result = atomically(executor, tables, shard_id, max_deadlock_retries, source_id, |txn, metadata| {
        let (written, delta) = write_burst(txn, tables, shard_id, &metadata, edges)?;
        if delta != 0 {
            apply_count_delta(txn, tables, source_id, delta, false)?;
        }
        Ok(written)
    });
    timer.observe_duration();
    result
}

/// Writes a bulk-copy input (§4.3): a sequence of edges the caller guarantees
/// are grouped contiguously by `source_id`. Detects each burst's boundary by
/// equality to the current group's head (per §4.3's own wording — "adjacent-
/// group detection is by equality to the current group head"), commits each
/// burst as its own locked transaction, and advances to the next group,
/// exactly as §4.3 step 6 describes. A caller that already has a single
/// source's edges (no grouping needed) just passes a one-source slice; the
/// loop below runs it as a single burst.
pub(crate) fn write_copies<E: Executor>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    max_deadlock_retries: u32,
    edges: Vec<Edge>,
) -> Result<Vec<Edge>, ExecutorError> {
    let mut written = Vec::with_capacity(edges.len());
    let mut iter = edges.into_iter().peekable();
    while let Some(head) = iter.next() {
        let source_id = head.source_id;
        let mut burst = vec![head];
        while iter.peek().is_some_and(|e| e.source_id == source_id) {
            burst.push(iter.next().expect("peeked Some"));
        }
        let burst_result = write_one_burst(executor, tables, shard_id, max_deadlock_retries, source_id, &burst)?;
        written.extend(burst_result);
    }
    Ok(written)
}
