//! The engine's public entry point (§2): `Shard<E>` wires the metadata
//! transactor, writer, bulk ingester, reader and lifecycle wrappers together
//! behind one handle, generic over the [`Executor`] backing it.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::ShardConfig;
use crate::cursor::{Cursor, ResultWindow, ScanCursor};
use crate::db::{bulk, lifecycle, metadata, reader, writer, Tables};
use crate::error::{ExecutorError, ShardError};
use crate::executor::sqlite::SqliteExecutor;
use crate::executor::Executor;
use crate::model::{DestinationId, Edge, Metadata, SourceId, State};

/// Timeout attributed to a `ShardError::Timeout` when the backend doesn't
/// otherwise report how long it waited.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The storage engine for one physical shard (§5). `Clone + Send + Sync`:
/// every operation blocks the calling thread at the executor boundary, and a
/// clone is cheap whenever `E` itself is (a pooled connection handle, for the
/// sqlite backend).
#[derive(Clone)]
pub struct Shard<E: Executor> {
    executor: E,
    tables: Tables,
    shard_id: String,
    deadlock_retries: u32,
}

impl<E: Executor> Shard<E> {
    pub fn new(shard_id: impl Into<String>, executor: E, config: &ShardConfig) -> Self {
        Self {
            tables: Tables::new(&config.db_name),
            executor,
            shard_id: shard_id.into(),
            deadlock_retries: config.deadlock_retries,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    fn wrap(&self, err: ExecutorError) -> ShardError {
        ShardError::wrap(&self.shard_id, DEFAULT_TIMEOUT, err)
    }

    // --- reads (§4.4) ---

    pub fn get(&self, source_id: SourceId, destination_id: DestinationId) -> Result<Option<Edge>, ShardError> {
        reader::get(&self.executor, &self.tables, source_id, destination_id).map_err(|e| self.wrap(e))
    }

    pub fn select_by_destination_id(&self, source_id: SourceId, cursor: Cursor, limit: usize) -> Result<ResultWindow<Edge>, ShardError> {
        reader::select_by_destination_id(&self.executor, &self.tables, source_id, cursor, limit).map_err(|e| self.wrap(e))
    }

    /// §4.4 `count(source, states)`: `metadata.count` if the source's
    /// current metadata-level state is one of `states`, else `0`.
    pub fn count(&self, source_id: SourceId, states: &[State]) -> Result<i32, ShardError> {
        reader::count(&self.executor, &self.tables, source_id, states).map_err(|e| self.wrap(e))
    }

    /// §4.4 `counts(sources, results_map)`: batched `metadata.count` lookup.
    /// Sources with no metadata row are absent from the returned map rather
    /// than defaulting to `0`.
    pub fn counts(&self, source_ids: &[SourceId]) -> Result<HashMap<SourceId, i32>, ShardError> {
        reader::counts(&self.executor, &self.tables, source_ids).map_err(|e| self.wrap(e))
    }

    pub fn select_all_metadata(
        &self,
        cursor: ScanCursor<SourceId>,
        limit: usize,
    ) -> Result<(Vec<Metadata>, ScanCursor<SourceId>), ShardError> {
        reader::select_all_metadata(&self.executor, &self.tables, cursor, limit).map_err(|e| self.wrap(e))
    }

    pub fn select_all(
        &self,
        cursor: ScanCursor<(SourceId, DestinationId)>,
        limit: usize,
    ) -> Result<(Vec<Edge>, ScanCursor<(SourceId, DestinationId)>), ShardError> {
        reader::select_all(&self.executor, &self.tables, cursor, limit).map_err(|e| self.wrap(e))
    }

    pub fn select_by_position(&self, source_id: SourceId, cursor: Cursor, limit: usize) -> Result<ResultWindow<Edge>, ShardError> {
        reader::select_by_position(&self.executor, &self.tables, source_id, cursor, limit).map_err(|e| self.wrap(e))
    }

    pub fn select_including_archived(
        &self,
        source_id: SourceId,
        cursor: Cursor,
        limit: usize,
    ) -> Result<ResultWindow<Edge>, ShardError> {
        reader::select_including_archived(&self.executor, &self.tables, source_id, cursor, limit).map_err(|e| self.wrap(e))
    }

    /// §4.4 `select_edges`: like `select_by_position`, but over a
    /// caller-chosen set of states rather than the fixed `Normal`/`Removed`
    /// default.
    pub fn select_edges(&self, source_id: SourceId, states: &[State], cursor: Cursor, limit: usize) -> Result<ResultWindow<Edge>, ShardError> {
        reader::select_edges(&self.executor, &self.tables, source_id, states, cursor, limit).map_err(|e| self.wrap(e))
    }

    pub fn intersect(&self, source_id: SourceId, states: &[State], destination_ids: &[DestinationId]) -> Result<Vec<DestinationId>, ShardError> {
        reader::intersect(&self.executor, &self.tables, source_id, states, destination_ids).map_err(|e| self.wrap(e))
    }

    pub fn intersect_edges(&self, source_id: SourceId, states: &[State], destination_ids: &[DestinationId]) -> Result<Vec<Edge>, ShardError> {
        reader::intersect_edges(&self.executor, &self.tables, source_id, states, destination_ids).map_err(|e| self.wrap(e))
    }

    // --- writes (§4.2, §4.3) ---

    pub fn write(&self, edge: Edge) -> Result<Edge, ShardError> {
        writer::write(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, edge).map_err(|e| self.wrap(e))
    }

    /// §4.3 `write_copies`: a bulk-ingest input whose edges are grouped
    /// contiguously by `source_id` (caller-guaranteed, per §4.3's own
    /// adjacency contract) — each contiguous run is committed as its own
    /// locked burst.
    pub fn write_copies(&self, edges: Vec<Edge>) -> Result<Vec<Edge>, ShardError> {
        bulk::write_copies(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, edges).map_err(|e| self.wrap(e))
    }

    // --- lifecycle wrappers (§4.5) ---

    pub fn add(&self, source_id: SourceId, destination_id: DestinationId, position: i64, updated_at: u32) -> Result<Edge, ShardError> {
        lifecycle::add(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, destination_id, position, updated_at)
            .map_err(|e| self.wrap(e))
    }

    pub fn negate(&self, source_id: SourceId, destination_id: DestinationId, position: i64, updated_at: u32) -> Result<Edge, ShardError> {
        lifecycle::negate(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, destination_id, position, updated_at)
            .map_err(|e| self.wrap(e))
    }

    pub fn remove(&self, source_id: SourceId, destination_id: DestinationId, position: i64, updated_at: u32) -> Result<Edge, ShardError> {
        lifecycle::remove(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, destination_id, position, updated_at)
            .map_err(|e| self.wrap(e))
    }

    pub fn archive(&self, source_id: SourceId, destination_id: DestinationId, position: i64, updated_at: u32) -> Result<Edge, ShardError> {
        lifecycle::archive(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, destination_id, position, updated_at)
            .map_err(|e| self.wrap(e))
    }

    /// Archives `source_id` at the metadata level only (§4.5) — no edge row
    /// is touched; `get`/`select_*` keep returning edges in whatever state
    /// they were last individually written to.
    pub fn archive_source(&self, source_id: SourceId, updated_at: u32) -> Result<(), ShardError> {
        lifecycle::archive_source(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, updated_at)
            .map_err(|e| self.wrap(e))
    }

    /// Removes `source_id` at the metadata level only (§4.5).
    pub fn remove_source(&self, source_id: SourceId, updated_at: u32) -> Result<(), ShardError> {
        lifecycle::remove_source(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, updated_at)
            .map_err(|e| self.wrap(e))
    }

    /// Negates `source_id` at the metadata level only (§4.5).
    pub fn negate_source(&self, source_id: SourceId, updated_at: u32) -> Result<(), ShardError> {
        lifecycle::negate_source(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, source_id, updated_at)
            .map_err(|e| self.wrap(e))
    }

    /// §4.5 `write_metadata`: seeds or advances a source's metadata row
    /// directly, without going through an edge write. Used by callers
    /// restoring or pre-populating metadata (e.g. a cross-shard copy) ahead
    /// of the edges it describes.
    pub fn write_metadata(&self, metadata: Metadata) -> Result<(), ShardError> {
        lifecycle::write_metadata(&self.executor, &self.tables, &self.shard_id, self.deadlock_retries, metadata)
            .map_err(|e| self.wrap(e))
    }

    /// Runs `f` with `source_id`'s metadata row locked, touching no edge row
    /// itself (§4.5 `with_lock`) — an escape hatch for callers composing
    /// several lifecycle operations into one transaction.
    pub fn with_lock<T>(&self, f: impl FnMut(&mut E::Txn<'_>) -> Result<T, ExecutorError>) -> Result<T, ShardError> {
        metadata::with_lock(&self.executor, self.deadlock_retries, &self.shard_id, f).map_err(|e| self.wrap(e))
    }
}

impl Shard<SqliteExecutor> {
    /// Opens a private in-memory database and bootstraps its schema (§4.7).
    /// For tests and local development; production deployments run DDL out
    /// of band and construct a `Shard` with `new` directly.
    pub fn open_in_memory(shard_id: impl Into<String>, config: ShardConfig) -> Result<Self, ShardError> {
        let shard_id = shard_id.into();
        let executor = SqliteExecutor::open_in_memory().map_err(|e| ShardError::wrap(&shard_id, DEFAULT_TIMEOUT, e))?;
        executor
            .ensure_schema(&config.db_name)
            .map_err(|e| ShardError::wrap(&shard_id, DEFAULT_TIMEOUT, e))?;
        Ok(Self::new(shard_id, executor, &config))
    }

    /// Opens (creating if absent) a file-backed database and bootstraps its
    /// schema. Same caveat as `open_in_memory` about production DDL.
    pub fn open_file(shard_id: impl Into<String>, path: impl AsRef<std::path::Path>, config: ShardConfig) -> Result<Self, ShardError> {
        let shard_id = shard_id.into();
        let executor = SqliteExecutor::open_file(path).map_err(|e| ShardError::wrap(&shard_id, DEFAULT_TIMEOUT, e))?;
        executor
            .ensure_schema(&config.db_name)
            .map_err(|e| ShardError::wrap(&shard_id, DEFAULT_TIMEOUT, e))?;
        Ok(Self::new(shard_id, executor, &config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::State;

    fn test_shard() -> Shard<SqliteExecutor> {
        Shard::open_in_memory("shard0", ShardConfig::in_memory("shard0")).unwrap()
    }

    #[test]
    fn is_send_and_sync() {
        fn assert_bounds<T: Send + Sync + Clone>() {}
        assert_bounds::<Shard<SqliteExecutor>>();
    }

    #[test]
    fn write_then_get_round_trips() {
        let shard = test_shard();
        let edge = Edge::new(1, 100, 10, 1_000, State::Normal);
        let written = shard.write(edge).unwrap();
        assert_eq!(written, edge);
        assert_eq!(shard.get(1, 100).unwrap(), Some(edge));
        assert_eq!(shard.count(1, &[State::Normal]).unwrap(), 1);
    }

    #[test]
    fn stale_write_is_a_no_op() {
        let shard = test_shard();
        let fresh = Edge::new(1, 100, 10, 2_000, State::Normal);
        shard.write(fresh).unwrap();
        let stale = Edge::new(1, 100, 20, 1_000, State::Removed);
        let result = shard.write(stale).unwrap();
        assert_eq!(result, fresh, "a write older than the stored row must not move it");
    }

    #[test]
    fn write_metadata_seeds_then_advances() {
        let shard = test_shard();
        let seeded = Metadata { source_id: 7, count: 3, state: State::Normal, updated_at: 10 };
        shard.write_metadata(seeded).unwrap();
        assert_eq!(shard.count(7, &[State::Normal]).unwrap(), 3);

        // A collision with an older watermark must leave the row untouched.
        let stale = Metadata { source_id: 7, count: 99, state: State::Normal, updated_at: 5 };
        shard.write_metadata(stale).unwrap();
        assert_eq!(shard.count(7, &[State::Normal]).unwrap(), 3);

        // A collision with a newer watermark advances state and recomputes
        // count from the edges table (zero here, since none were written).
        let fresher = Metadata { source_id: 7, count: 0, state: State::Archived, updated_at: 20 };
        shard.write_metadata(fresher).unwrap();
        assert_eq!(shard.count(7, &[State::Archived]).unwrap(), 0);
        assert_eq!(shard.count(7, &[State::Normal]).unwrap(), 0);
    }

    #[test]
    fn archive_source_only_moves_the_metadata_row() {
        let shard = test_shard();
        shard.write(Edge::new(1, 100, 1, 10, State::Normal)).unwrap();
        shard.write(Edge::new(1, 200, 2, 10, State::Normal)).unwrap();
        shard.archive_source(1, 20).unwrap();

        assert_eq!(shard.count(1, &[State::Archived]).unwrap(), 2, "metadata state/count move to Archived");
        assert_eq!(shard.count(1, &[State::Normal]).unwrap(), 0);
        assert_eq!(shard.get(1, 100).unwrap().unwrap().state, State::Normal, "individual edge rows are left untouched");
        assert_eq!(shard.get(1, 200).unwrap().unwrap().state, State::Normal);
    }
}
