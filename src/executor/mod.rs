//! The executor abstraction (§6.3): the only external collaborator the
//! storage engine depends on besides a monotonic clock. `Executor` is
//! generic rather than object-safe — `Shard<E: Executor>` is parameterized
//! over it the way the teacher crate parameterizes its transaction types
//! over lock guards, so a second backend can be added later without
//! touching the engine's call sites.

pub mod sqlite;

use crate::error::ExecutorError;
use crate::model::State;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Tags routing a query to a possibly distinct replica/timeout class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Select,
    SelectModify,
    SelectCopy,
}

/// A bound parameter. Kept to the handful of integer shapes the schema (§6.2)
/// actually needs; a backend maps each arm onto its native parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    I64(i64),
    U64(u64),
    U32(u32),
    U8(u8),
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::I64(v)
    }
}
impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::U64(v)
    }
}
impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::U32(v)
    }
}
impl From<u8> for Param {
    fn from(v: u8) -> Self {
        Param::U8(v)
    }
}
impl From<State> for Param {
    fn from(state: State) -> Self {
        Param::U8(state.into())
    }
}

/// A single row of a result set, decoded lazily by column index.
pub trait SqlRow {
    fn get_i64(&self, idx: usize) -> ExecutorResult<i64>;
    fn get_u32(&self, idx: usize) -> ExecutorResult<u32>;
    fn get_u64(&self, idx: usize) -> ExecutorResult<u64>;
    fn get_u8(&self, idx: usize) -> ExecutorResult<u8>;

    fn get_state(&self, idx: usize) -> ExecutorResult<State> {
        let raw = self.get_u8(idx)?;
        State::try_from(raw).map_err(|e| ExecutorError::Other(anyhow::anyhow!(e)))
    }
}

/// Shared capability of a top-level executor handle and an open transaction:
/// run parameterized statements and read rows back. This is what `atomically`
/// and the reader paths are written against.
pub trait Queryable {
    type Row<'a>: SqlRow
    where
        Self: 'a;

    /// Runs `sql`, decodes at most one row with `f`. `None` if no row matched.
    fn select_one<T>(
        &self,
        class: QueryClass,
        sql: &str,
        params: &[Param],
        f: impl FnOnce(&Self::Row<'_>) -> ExecutorResult<T>,
    ) -> ExecutorResult<Option<T>>;

    /// Runs `sql`, decoding every returned row with `f`, in result order.
    fn select<T>(
        &self,
        class: QueryClass,
        sql: &str,
        params: &[Param],
        f: impl FnMut(&Self::Row<'_>) -> ExecutorResult<T>,
    ) -> ExecutorResult<Vec<T>>;

    /// Runs a DML statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Param]) -> ExecutorResult<u64>;

    /// Multi-row insert (§4.3 step 2). Returns one status per input row in
    /// order: non-negative on success, negative on a per-row failure such as
    /// a unique-constraint violation (§4.3 step 3) — the bulk ingester uses
    /// the sign, not the magnitude, to partition the burst into completed
    /// vs. failed rows.
    fn execute_batch(&self, sql: &str, rows: &[Vec<Param>]) -> ExecutorResult<Vec<i64>>;
}

/// A transactional SQL-like executor. The engine never talks to a backend
/// except through this trait.
pub trait Executor: Queryable + Clone + Send + Sync + 'static {
    type Txn<'c>: Queryable
    where
        Self: 'c;

    /// Runs `f` inside a database transaction. Commits on `Ok`, rolls back on
    /// `Err`. §4.1 requires this to take an exclusive lock suitable for a
    /// `SELECT ... FOR UPDATE` on whatever row `f` reads first; the concrete
    /// locking strategy is a backend decision (see `sqlite::SqliteExecutor`).
    fn transaction<T>(&self, f: impl FnOnce(&mut Self::Txn<'_>) -> ExecutorResult<T>) -> ExecutorResult<T>;
}
