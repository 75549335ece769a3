//! Property-based checks of pagination completeness and reversibility
//! (testable properties 6-7), generated with `proptest` the way the teacher
//! crate checks its own datastore invariants.

use std::collections::BTreeSet;

use proptest::prelude::*;
use shardstore::cursor::Cursor;
use shardstore::executor::sqlite::SqliteExecutor;
use shardstore::{Edge, Shard, ShardConfig, State};

fn build_shard(positions: &[i64]) -> Shard<SqliteExecutor> {
    let shard = Shard::open_in_memory("prop", ShardConfig::in_memory("prop")).unwrap();
    for (i, position) in positions.iter().enumerate() {
        shard.write(Edge::new(1, i as u64, *position, 1, State::Normal)).unwrap();
    }
    shard
}

/// Walks from `Cursor::Start` following `next_cursor`, the canonical
/// direction (descending by `position`, largest first).
fn forward_walk(shard: &Shard<SqliteExecutor>, page_size: usize) -> Vec<(i64, u64)> {
    let mut out = Vec::new();
    let mut cursor = Cursor::Start;
    loop {
        let window = shard.select_by_position(1, cursor, page_size).unwrap();
        out.extend(window.page.iter().map(|e| (e.position, e.destination_id)));
        if window.next_cursor == Cursor::End {
            break;
        }
        cursor = window.next_cursor;
    }
    out
}

/// Walks from the very bottom (`Cursor::Backward(i64::MIN)`, ascending)
/// following `prev_cursor` back up toward the start, splicing each page in
/// front of what's already accumulated so the result lands in the same
/// canonical (descending) order as `forward_walk`.
fn backward_walk(shard: &Shard<SqliteExecutor>, page_size: usize) -> Vec<(i64, u64)> {
    let mut out = Vec::new();
    let mut cursor = Cursor::Backward(i64::MIN);
    loop {
        let window = shard.select_by_position(1, cursor, page_size).unwrap();
        out.splice(0..0, window.page.iter().map(|e| (e.position, e.destination_id)));
        if window.prev_cursor == Cursor::End {
            break;
        }
        cursor = window.prev_cursor;
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Paging forward to exhaustion visits every inserted edge exactly once,
    /// regardless of page size (property 6: pagination completeness).
    #[test]
    fn forward_pagination_is_complete_and_duplicate_free(
        positions in prop::collection::btree_set(-500i64..500, 1..40),
        page_size in 1usize..9,
    ) {
        let positions: Vec<i64> = positions.into_iter().collect();
        let shard = build_shard(&positions);
        let walked = forward_walk(&shard, page_size);

        let expected: BTreeSet<i64> = positions.iter().copied().collect();
        let walked_positions: BTreeSet<i64> = walked.iter().map(|(p, _)| *p).collect();
        prop_assert_eq!(walked.len(), positions.len());
        prop_assert_eq!(walked_positions, expected);

        // The canonical direction descends by position (§8 scenario S5).
        let mut ordered = walked.clone();
        ordered.sort_by_key(|(p, _)| std::cmp::Reverse(*p));
        prop_assert_eq!(walked, ordered);
    }

    /// Walking forward from `Start` and walking backward from the bottom
    /// land on the same sequence of rows (property 7: reversibility).
    #[test]
    fn backward_pagination_from_the_end_matches_forward_from_start(
        positions in prop::collection::btree_set(-500i64..500, 1..40),
        page_size in 1usize..9,
    ) {
        let positions: Vec<i64> = positions.into_iter().collect();
        let shard = build_shard(&positions);
        let forward = forward_walk(&shard, page_size);
        let backward = backward_walk(&shard, page_size);
        prop_assert_eq!(forward, backward);
    }
}
