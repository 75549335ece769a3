//! The metadata transactor (§4.1): every write to a source's edges goes
//! through `atomically`, which locks that source's metadata row before the
//! caller's closure runs and commits iff the closure returns `Ok`. Grounded
//! on the teacher's `RelationalDB::with_auto_commit`/`finish_tx` pair — open
//! a transaction, run the body, commit on success, roll back on failure.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::instrument;

use crate::error::ExecutorError;
use crate::executor::{Executor, Param, QueryClass, Queryable};
use crate::model::{Metadata, SourceId};

use super::Tables;

/// Reads the metadata row for `source_id`, inserting a zeroed default row if
/// none exists yet. Safe to call unconditionally at the top of a locked
/// transaction: on this backend the enclosing `BEGIN IMMEDIATE` already rules
/// out a concurrent insert racing with this one.
pub(crate) fn load_or_insert_metadata<Q: Queryable>(
    txn: &Q,
    tables: &Tables,
    source_id: SourceId,
) -> Result<Metadata, ExecutorError> {
    let select_sql = format!(
        "SELECT source_id, count, state, updated_at FROM {} WHERE source_id = ?",
        tables.metadata
    );
    let existing = txn.select_one(QueryClass::SelectModify, &select_sql, &[Param::from(source_id)], |row| {
        Ok(Metadata {
            source_id: row.get_u64(0)?,
            count: row.get_i64(1)? as i32,
            state: row.get_state(2)?,
            updated_at: row.get_u32(3)?,
        })
    })?;

    match existing {
        Some(metadata) => Ok(metadata),
        None => {
            // §4.1: the default row's count is not zero but a scan of the
            // source's `Normal` edges, in case edges for this source were
            // written before its metadata row existed.
            let scan_sql = format!(
                "SELECT COUNT(*) FROM {} WHERE source_id = ? AND state = ?",
                tables.edges
            );
            let scanned_count = txn
                .select_one(QueryClass::SelectModify, &scan_sql, &[Param::from(source_id), Param::from(crate::model::State::Normal)], |row| {
                    row.get_i64(0)
                })?
                .unwrap_or(0) as i32;
            let metadata = Metadata::default_for(source_id, scanned_count);
            let insert_sql = format!(
                "INSERT INTO {} (source_id, count, state, updated_at) VALUES (?, ?, ?, ?)",
                tables.metadata
            );
            txn.execute(
                &insert_sql,
                &[
                    Param::from(metadata.source_id),
                    Param::I64(metadata.count as i64),
                    Param::from(metadata.state),
                    Param::from(metadata.updated_at),
                ],
            )?;
            Ok(metadata)
        }
    }
}

/// Runs `f` with the source's metadata row locked (§4.1), retrying up to
/// `max_retries` times if the backend reports a deadlock. `f` receives the
/// metadata row as it stood when the lock was taken; it is responsible for
/// re-reading anything it mutates if it needs a fresher view mid-transaction.
#[instrument(skip(executor, f), fields(shard_id = %shard_id, source_id = %source_id))]
pub(crate) fn atomically<E, T>(
    executor: &E,
    tables: &Tables,
    shard_id: &str,
    max_retries: u32,
    source_id: SourceId,
    mut f: impl FnMut(&mut E::Txn<'_>, Metadata) -> Result<T, ExecutorError>,
) -> Result<T, ExecutorError>
where
    E: Executor,
{
    let mut attempt = 0;
    loop {
        let outcome = executor.transaction(|txn| {
            let metadata = load_or_insert_metadata(txn, tables, source_id)?;
            f(txn, metadata)
        });

        match outcome {
            Ok(value) => return Ok(value),
            Err(ExecutorError::Deadlock) if attempt < max_retries => {
                attempt += 1;
                crate::metrics::DEADLOCK_RETRIES_TOTAL.with_label_values(&[shard_id]).inc();
                tracing::debug!(attempt, "retrying after deadlock");
                thread::sleep(backoff(attempt));
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Jittered backoff between deadlock retries: a small base delay scaled by
/// attempt number, plus up to 5ms of random jitter to avoid every contending
/// writer retrying in lockstep.
fn backoff(attempt: u32) -> Duration {
    let base_ms = 2u64.saturating_mul(attempt as u64);
    let jitter_ms = rand::rng().random_range(0..5);
    Duration::from_millis(base_ms + jitter_ms)
}

/// Runs `f` with the source locked, without the metadata pre-read
/// `atomically` does — for lifecycle operations that only need the lock
/// itself (§4.5 `with_lock`), not a metadata snapshot.
pub(crate) fn with_lock<E, T>(
    executor: &E,
    max_retries: u32,
    shard_id: &str,
    mut f: impl FnMut(&mut E::Txn<'_>) -> Result<T, ExecutorError>,
) -> Result<T, ExecutorError>
where
    E: Executor,
{
    let mut attempt = 0;
    loop {
        match executor.transaction(|txn| f(txn)) {
            Ok(value) => return Ok(value),
            Err(ExecutorError::Deadlock) if attempt < max_retries => {
                attempt += 1;
                crate::metrics::DEADLOCK_RETRIES_TOTAL.with_label_values(&[shard_id]).inc();
                tracing::debug!(attempt, "retrying after deadlock");
                thread::sleep(backoff(attempt));
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
