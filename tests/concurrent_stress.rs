//! Concurrent writers and readers on shared rows.
//!
//! These tests target the optimistic read protocol:
//! - torn reads of the column slots while master overwrites them
//! - half-spliced chains while branch and master writers interleave
//! - branch creation racing with inserts
//!
//! Run with:
//! ```bash
//! cargo test --release --test concurrent_stress
//! ```

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use branchstore::{Database, I64Codec, MASTER, RowId, StoreConfig};

const ROWS: usize = 32;

/// Every value written in these tests repeats one number across all columns.
fn uniform(value: i64) -> Vec<i64> {
    vec![value; 4]
}

fn is_uniform(tuple: &[i64]) -> bool {
    tuple.windows(2).all(|w| w[0] == w[1])
}

#[test]
fn test_no_torn_reads_under_master_writes() {
    common::init_tracing();
    let db = Arc::new(Database::new());
    let table = db.create_table("t", I64Codec::new(4)).unwrap();
    let tids: Arc<Vec<RowId>> = Arc::new(
        (0..ROWS)
            .map(|i| db.insert(&table, &uniform(i as i64), MASTER).unwrap())
            .collect(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let (db, table, tids) = (Arc::clone(&db), Arc::clone(&table), Arc::clone(&tids));
            thread::spawn(move || {
                for op in 0..2_000 {
                    let tid = tids[(op * 7 + t) % ROWS];
                    db.update(&table, tid, &uniform((t * 10_000 + op) as i64), MASTER)
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let (db, table, tids, stop) = (
                Arc::clone(&db),
                Arc::clone(&table),
                Arc::clone(&tids),
                Arc::clone(&stop),
            );
            thread::spawn(move || {
                let ctx = db.context(MASTER).unwrap();
                let mut reads = 0usize;
                loop {
                    for &tid in tids.iter() {
                        let tuple = db.get_value(&table, tid, 0, &ctx).unwrap();
                        assert!(is_uniform(&tuple), "torn read of {tid}: {tuple:?}");
                        reads += 1;
                    }
                    if stop.load(Ordering::Relaxed) {
                        break reads;
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }

    // 8000 updates over 32 rows, plus one inserted value each.
    assert_eq!(table.archived_nodes(), 8_000);
}

#[test]
fn test_branch_and_master_writers_interleave() {
    common::init_tracing();
    let db = Arc::new(Database::new());
    let table = db.create_table("t", I64Codec::new(4)).unwrap();
    let tids: Arc<Vec<RowId>> = Arc::new(
        (0..ROWS)
            .map(|_| db.insert(&table, &uniform(0), MASTER).unwrap())
            .collect(),
    );
    let branches: Arc<Vec<u32>> = Arc::new(
        (0..3)
            .map(|b| db.create_branch(&format!("b{b}"), MASTER).unwrap())
            .collect(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    // One writer per branch plus one on master. Branch writers write
    // (branch * 1_000_000 + op) so readers can tell who wrote what.
    let writers: Vec<_> = std::iter::once(MASTER)
        .chain(branches.iter().copied())
        .map(|branch| {
            let (db, table, tids) = (Arc::clone(&db), Arc::clone(&table), Arc::clone(&tids));
            thread::spawn(move || {
                for op in 0..1_500usize {
                    let tid = tids[op % ROWS];
                    let value = i64::from(branch) * 1_000_000 + op as i64 + 1;
                    db.update(&table, tid, &uniform(value), branch).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..3)
        .map(|r| {
            let (db, table, branches, stop) = (
                Arc::clone(&db),
                Arc::clone(&table),
                Arc::clone(&branches),
                Arc::clone(&stop),
            );
            thread::spawn(move || {
                let branch = branches[r];
                let ctx = db.context(branch).unwrap();
                while !stop.load(Ordering::Relaxed) {
                    for item in db.scan_latest(&table, &ctx) {
                        let (tid, tuple) = item.unwrap();
                        assert!(is_uniform(&tuple), "torn read of {tid}: {tuple:?}");
                        // Either the inherited master value or this branch's own.
                        let owner = tuple[0] / 1_000_000;
                        assert!(
                            tuple[0] == 0 || owner == i64::from(branch),
                            "branch {branch} saw {tuple:?} on {tid}"
                        );
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    // Final state: every branch sees its last write; master its own.
    for (i, &tid) in tids.iter().enumerate() {
        let last_op = (0..1_500usize).filter(|op| op % ROWS == i).max().unwrap() as i64 + 1;
        for branch in std::iter::once(MASTER).chain(branches.iter().copied()) {
            let ctx = db.context(branch).unwrap();
            let expected = i64::from(branch) * 1_000_000 + last_op;
            assert_eq!(db.get_value(&table, tid, 0, &ctx).unwrap(), uniform(expected));
        }
    }
}

#[test]
fn test_master_history_survives_concurrent_readers() {
    common::init_tracing();
    let db = Arc::new(Database::with_config(
        StoreConfig::default().with_max_read_retries(Some(8)),
    ));
    let table = db.create_table("t", I64Codec::new(4)).unwrap();
    let tid = db.insert(&table, &uniform(0), MASTER).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let (db, table) = (Arc::clone(&db), Arc::clone(&table));
        thread::spawn(move || {
            for v in 1..=1_000 {
                db.update(&table, tid, &uniform(v), MASTER).unwrap();
            }
        })
    };

    // The latest value never goes backwards, and revision k of a later
    // read is at least k behind the latest value read before it.
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let (db, table, stop) = (Arc::clone(&db), Arc::clone(&table), Arc::clone(&stop));
            thread::spawn(move || {
                let ctx = db.context(MASTER).unwrap();
                let mut last_latest = 0;
                while !stop.load(Ordering::Relaxed) {
                    let latest = db.get_value(&table, tid, 0, &ctx).unwrap();
                    assert!(is_uniform(&latest));
                    assert!(latest[0] >= last_latest, "latest went back: {latest:?}");
                    last_latest = latest[0];

                    for k in 1..4i64 {
                        let Ok(tuple) = db.get_value(&table, tid, k as usize, &ctx) else {
                            break;
                        };
                        assert!(is_uniform(&tuple));
                        assert!(tuple[0] >= last_latest - k, "revision {k} too old: {tuple:?}");
                        assert!(tuple[0] <= 1_000 - k, "revision {k} too new: {tuple:?}");
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    let ctx = db.context(MASTER).unwrap();
    for k in 0..=1_000usize {
        assert_eq!(
            db.get_value(&table, tid, k, &ctx).unwrap(),
            uniform(1_000 - k as i64)
        );
    }
}

#[test]
fn test_branch_creation_races_inserts() {
    common::init_tracing();
    let db = Arc::new(Database::new());
    let table = db.create_table("t", I64Codec::new(4)).unwrap();

    let inserter = {
        let (db, table) = (Arc::clone(&db), Arc::clone(&table));
        thread::spawn(move || {
            (0..2_000)
                .map(|v| db.insert(&table, &uniform(v), MASTER).unwrap())
                .collect::<Vec<_>>()
        })
    };
    let forker = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            (0..50)
                .map(|b| db.create_branch(&format!("b{b}"), MASTER).unwrap())
                .collect::<Vec<_>>()
        })
    };

    let tids = inserter.join().unwrap();
    let branches = forker.join().unwrap();

    // Each branch sees a prefix of the inserts: rows are appended in order
    // and the clock never goes backwards.
    let mut previous = 0;
    for branch in branches {
        let ctx = db.context(branch).unwrap();
        let seen: Vec<bool> = tids.iter().map(|&t| db.is_visible(&table, t, &ctx)).collect();
        let prefix = seen.iter().take_while(|&&v| v).count();
        assert!(seen[prefix..].iter().all(|&v| !v), "branch {branch} sees a gap");
        assert!(prefix >= previous);
        previous = prefix;
    }
}
