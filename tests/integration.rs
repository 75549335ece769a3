//! Integration scenarios against `SqliteExecutor` over an in-memory
//! database, covering the engine's headline invariants end to end.

use pretty_assertions::assert_eq;
use shardstore::cursor::Cursor;
use shardstore::{Edge, Shard, ShardConfig, State};

fn shard(name: &str) -> Shard<shardstore::executor::sqlite::SqliteExecutor> {
    // r2d2's pool events go through `log`, not `tracing`; wiring both up in
    // tests means `RUST_LOG=r2d2=debug,shardstore=trace` surfaces both the
    // pool's own logging and this crate's `#[instrument]`ed transaction
    // boundary.
    let _ = env_logger::try_init();
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    Shard::open_in_memory(name, ShardConfig::in_memory(name)).expect("in-memory shard opens")
}

#[test]
fn open_file_persists_a_shard_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("shard.sqlite3");

    {
        let shard = Shard::open_file("file-shard", &db_path, ShardConfig::in_memory("file-shard")).unwrap();
        shard.write(Edge::new(1, 42, 5, 100, State::Normal)).unwrap();
    }

    let reopened = Shard::open_file("file-shard", &db_path, ShardConfig::in_memory("file-shard")).unwrap();
    assert_eq!(reopened.get(1, 42).unwrap(), Some(Edge::new(1, 42, 5, 100, State::Normal)));
    assert_eq!(reopened.count(1, &[State::Normal]).unwrap(), 1);
}

#[test]
fn s1_write_then_read_round_trips() {
    let shard = shard("s1");
    let edge = Edge::new(1, 42, 5, 100, State::Normal);
    assert_eq!(shard.write(edge).unwrap(), edge);
    assert_eq!(shard.get(1, 42).unwrap(), Some(edge));
    assert_eq!(shard.count(1, &[State::Normal]).unwrap(), 1);
}

#[test]
fn s2_later_write_wins_over_earlier_one() {
    let shard = shard("s2");
    shard.write(Edge::new(1, 42, 5, 100, State::Normal)).unwrap();
    // An update keeps the stored position and zeroes the row's own `count`
    // column (§4.2) except when reactivating out of `Archived` into
    // `Normal` — neither holds here, so only state/updated_at advance.
    let later = Edge::new(1, 42, 9, 200, State::Removed);
    let result = shard.write(later).unwrap();
    assert_eq!(result.state, State::Removed);
    assert_eq!(result.updated_at, 200);
    assert_eq!(result.position, 5, "a non-reactivating update must keep the stored position");
    assert_eq!(result.count, 0);
    assert_eq!(shard.get(1, 42).unwrap(), Some(result));
}

#[test]
fn s4_reactivation_from_archived_replaces_position() {
    // Literal §8 scenario S4: archiving then re-adding (Archived -> Normal)
    // replaces the stored position with the incoming one.
    let shard = shard("s4-reactivation");
    shard.archive(10, 20, 1000, 100).unwrap();
    let reactivated = shard.add(10, 20, 2000, 200).unwrap();
    assert_eq!(reactivated.state, State::Normal);
    assert_eq!(reactivated.updated_at, 200);
    assert_eq!(reactivated.position, 2000);
    assert_eq!(shard.count(10, &[State::Normal]).unwrap(), 1);
}

#[test]
fn s3_stale_write_is_idempotent_no_op() {
    let shard = shard("s3");
    let current = Edge::new(1, 42, 5, 200, State::Normal);
    shard.write(current).unwrap();
    let stale = Edge::new(1, 42, 9, 100, State::Removed);
    let result = shard.write(stale).unwrap();
    assert_eq!(result, current, "a write behind the stored (updated_at, state) must not move the row");
}

#[test]
fn s4_equal_updated_at_breaks_ties_by_state_precedence() {
    let shard = shard("s4");
    shard.write(Edge::new(1, 42, 5, 100, State::Normal)).unwrap();
    // Same updated_at, higher-precedence state: must win.
    let archived = Edge::new(1, 42, 5, 100, State::Archived);
    let result = shard.write(archived).unwrap();
    assert_eq!(result.state, State::Archived);
    // Same updated_at, lower-precedence state: must not move it back.
    let normal_again = Edge::new(1, 42, 5, 100, State::Normal);
    let result = shard.write(normal_again).unwrap();
    assert_eq!(result.state, State::Archived);
}

#[test]
fn s5_bulk_copy_falls_back_on_partial_collision() {
    let shard = shard("s5");
    // Pre-existing edge for destination 2 with a newer timestamp than the
    // burst below — the bulk insert will collide on it and must fall back
    // to the single-edge path, which then correctly no-ops.
    shard.write(Edge::new(1, 2, 20, 500, State::Normal)).unwrap();

    let burst = vec![
        Edge::new(1, 1, 10, 100, State::Normal),
        Edge::new(1, 2, 11, 100, State::Normal),
        Edge::new(1, 3, 12, 100, State::Normal),
    ];
    let written = shard.write_copies(burst).unwrap();
    assert_eq!(written.len(), 3);

    assert_eq!(shard.get(1, 1).unwrap().unwrap().updated_at, 100);
    // destination 2 must keep its newer row, unmoved by the stale burst entry.
    assert_eq!(shard.get(1, 2).unwrap().unwrap().updated_at, 500);
    assert_eq!(shard.get(1, 3).unwrap().unwrap().updated_at, 100);
    assert_eq!(shard.count(1, &[State::Normal]).unwrap(), 3);
}

#[test]
fn write_copies_splits_a_multi_source_input_into_separate_bursts() {
    // §4.3's input contract: a flat sequence of edges grouped contiguously
    // by source_id. The ingester must detect each burst's boundary itself
    // and commit source 1's group and source 2's group independently.
    let shard = shard("multi-source-copy");
    let mixed = vec![
        Edge::new(1, 10, 1, 100, State::Normal),
        Edge::new(1, 20, 2, 100, State::Normal),
        Edge::new(2, 10, 1, 100, State::Normal),
        Edge::new(2, 20, 2, 100, State::Normal),
        Edge::new(2, 30, 3, 100, State::Normal),
    ];
    let written = shard.write_copies(mixed).unwrap();
    assert_eq!(written.len(), 5);

    assert_eq!(shard.count(1, &[State::Normal]).unwrap(), 2);
    assert_eq!(shard.count(2, &[State::Normal]).unwrap(), 3);
    assert!(shard.get(1, 10).unwrap().is_some());
    assert!(shard.get(2, 30).unwrap().is_some());
}

#[test]
fn s6_bidirectional_pagination_covers_every_row_without_duplicates() {
    let shard = shard("s6");
    for i in 0..25i64 {
        shard.write(Edge::new(1, i as u64, i, 1, State::Normal)).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = Cursor::Start;
    loop {
        let window = shard.select_by_position(1, cursor, 7).unwrap();
        seen.extend(window.page.iter().map(|e| e.destination_id));
        if window.next_cursor == Cursor::End {
            break;
        }
        cursor = window.next_cursor;
    }
    seen.sort_unstable();
    assert_eq!(seen, (0u64..25).collect::<Vec<_>>());
}

#[test]
fn s5_start_cursor_pages_destination_ids_in_descending_order() {
    // Literal §8 scenario S5: from `Cursor::Start`, two at a time, in
    // descending `destination_id` order, following `next_cursor` only.
    let shard = shard("s5-pagination");
    for destination_id in [100u64, 200, 300, 400, 500] {
        shard.write(Edge::new(1, destination_id, destination_id as i64, 1, State::Normal)).unwrap();
    }

    let page1 = shard.select_by_destination_id(1, Cursor::Start, 2).unwrap();
    assert_eq!(page1.page.iter().map(|e| e.destination_id).collect::<Vec<_>>(), vec![500, 400]);
    assert_eq!(page1.prev_cursor, Cursor::End, "nothing precedes the first page");

    let page2 = shard.select_by_destination_id(1, page1.next_cursor, 2).unwrap();
    assert_eq!(page2.page.iter().map(|e| e.destination_id).collect::<Vec<_>>(), vec![300, 200]);

    let page3 = shard.select_by_destination_id(1, page2.next_cursor, 2).unwrap();
    assert_eq!(page3.page.iter().map(|e| e.destination_id).collect::<Vec<_>>(), vec![100]);
    assert_eq!(page3.next_cursor, Cursor::End);
}

#[test]
fn archive_source_is_monotonic_against_a_newer_edge() {
    let shard = shard("archive-source");
    shard.write(Edge::new(1, 100, 1, 50, State::Normal)).unwrap();
    // A source-level archive never touches edge rows at all (§4.5); the
    // individually-written edge keeps its own state regardless of order.
    shard.archive_source(1, 10).unwrap();
    assert_eq!(shard.get(1, 100).unwrap().unwrap().state, State::Normal, "archive_source must not rewrite edge rows");
}

#[test]
fn intersect_returns_only_live_matches() {
    let shard = shard("intersect");
    shard.write(Edge::new(1, 10, 1, 1, State::Normal)).unwrap();
    shard.write(Edge::new(1, 20, 2, 1, State::Negative)).unwrap();
    let matches = shard.intersect(1, &[State::Normal, State::Removed], &[10, 20, 30]).unwrap();
    assert_eq!(matches, vec![10]);
}
