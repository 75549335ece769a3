//! Error taxonomy (§7). Recoverable kinds (`IntegrityViolation`, `Deadlock`,
//! `MissingMetadataRow`) are consumed inside the writer/transactor and never
//! reach a caller; everything else is wrapped with the shard identity at the
//! shard boundary, mirroring how the teacher crate's `DBError`/`NodesError`
//! pair re-tags backend errors as they cross a module boundary.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an [`crate::executor::Executor`] implementation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unique constraint violation on `{constraint}`")]
    IntegrityViolation { constraint: String },
    #[error("deadlock detected, transaction rolled back")]
    Deadlock,
    #[error("query exceeded its timeout")]
    QueryTimeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced to callers of [`crate::shard::Shard`]. Every backend error
/// is tagged with the shard it came from so callers never have to guess
/// which shard failed in a fan-out.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("shard `{shard_id}` timed out after {timeout:?}")]
    Timeout {
        shard_id: String,
        timeout: Duration,
        #[source]
        cause: ExecutorError,
    },
    #[error("shard `{shard_id}` error")]
    Backend {
        shard_id: String,
        #[source]
        source: ExecutorError,
    },
}

impl ShardError {
    pub(crate) fn wrap(shard_id: &str, timeout: Duration, err: ExecutorError) -> Self {
        match err {
            ExecutorError::QueryTimeout => ShardError::Timeout {
                shard_id: shard_id.to_owned(),
                timeout,
                cause: ExecutorError::QueryTimeout,
            },
            other => ShardError::Backend {
                shard_id: shard_id.to_owned(),
                source: other,
            },
        }
    }
}

/// Internal error type for the body of a metadata transaction (§4.1).
/// `MissingMetadataRow` is the sentinel the transactor catches to trigger a
/// lazy insert-and-retry; it must never be allowed to escape `atomically`.
#[derive(Debug, Error)]
pub(crate) enum TxError {
    #[error("metadata row missing")]
    MissingMetadataRow,
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl From<TxError> for ExecutorError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::MissingMetadataRow => {
                ExecutorError::Other(anyhow::anyhow!("metadata row missing escaped the transactor"))
            }
            TxError::Executor(e) => e,
        }
    }
}
