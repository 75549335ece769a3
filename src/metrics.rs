//! Engine metrics (ambient). The teacher crate defines its metrics with a
//! `metrics_group!` macro from a sibling `spacetimedb-metrics` crate; that
//! macro isn't available outside the teacher's own workspace, so these are
//! hand-declared with the same `prometheus` + `once_cell::sync::Lazy` shape
//! its expansion produces.

use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, Registry};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Number of times `atomically` retried a transaction after
/// `ExecutorError::Deadlock`, labeled by shard id (§4.1, §7).
pub static DEADLOCK_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let metric = IntCounterVec::new(
        prometheus::Opts::new(
            "shardstore_deadlock_retries_total",
            "transaction retries after a backend-reported deadlock",
        ),
        &["shard_id"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(metric.clone())).expect("metric not already registered");
    metric
});

/// Number of times a client-supplied `position` collided with an existing
/// row and the writer had to choose a new one (§4.2 edge case, §9 TODO).
pub static POSITION_COLLISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let metric = IntCounterVec::new(
        prometheus::Opts::new(
            "shardstore_position_collisions_total",
            "position collisions resolved by the single-edge writer",
        ),
        &["shard_id"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(metric.clone())).expect("metric not already registered");
    metric
});

/// Number of rows in a bulk copy burst that fell back to the per-row
/// fine-grained write path after the bulk insert partially failed (§4.3).
pub static BULK_BATCH_FALLBACK_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let metric = IntCounterVec::new(
        prometheus::Opts::new(
            "shardstore_bulk_batch_fallback_total",
            "rows in a bulk copy burst retried individually after a batch insert failure",
        ),
        &["shard_id"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(metric.clone())).expect("metric not already registered");
    metric
});

/// Wall-clock duration of a full `write_burst` call, labeled by shard id.
pub static BULK_BURST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let metric = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "shardstore_bulk_burst_duration_seconds",
            "wall-clock duration of a bulk edge-copy burst",
        ),
        &["shard_id"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(metric.clone())).expect("metric not already registered");
    metric
});
