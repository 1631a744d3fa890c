//! Diagnostic binary: concurrent branch workload.
//!
//! Writers update a shared set of rows on master and on several branches
//! while scanners run latest/earliest scans on every branch. A watchdog
//! reports threads that stop making progress (lock hangs), and the run ends
//! with throughput and chain statistics.
//!
//! Run with:
//! ```bash
//! RUST_LOG=branchstore=debug cargo run --features tracing -- [writers] [ops] [rows] [branches]
//! ```

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use branchstore::{BranchId, Database, I64Codec, MASTER, RowId, StoreConfig, StoreError, Table};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// =============================================================================
// Logging
// =============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_target(true)
        .compact()
        .with_filter(filter);

    let _ = Registry::default().with(console).try_init();
}

// =============================================================================
// Thread progress tracking for hang detection
// =============================================================================

struct ThreadProgress {
    /// Current operation index for each thread
    current_op: Vec<AtomicUsize>,
    /// Last time each thread made progress
    last_progress_ms: Vec<AtomicU64>,
    /// Whether each thread is done
    done: Vec<AtomicBool>,
    start: Instant,
}

impl ThreadProgress {
    fn new(num_threads: usize) -> Self {
        Self {
            current_op: (0..num_threads).map(|_| AtomicUsize::new(0)).collect(),
            last_progress_ms: (0..num_threads).map(|_| AtomicU64::new(0)).collect(),
            done: (0..num_threads).map(|_| AtomicBool::new(false)).collect(),
            start: Instant::now(),
        }
    }

    fn update(&self, thread_id: usize, op: usize) {
        self.current_op[thread_id].store(op, Ordering::Relaxed);
        self.last_progress_ms[thread_id]
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn mark_done(&self, thread_id: usize) {
        self.done[thread_id].store(true, Ordering::Relaxed);
    }

    fn report_stuck(&self, timeout_ms: u64) -> Vec<(usize, usize, u64)> {
        let now_ms = self.start.elapsed().as_millis() as u64;

        (0..self.done.len())
            .filter(|&i| !self.done[i].load(Ordering::Relaxed))
            .filter_map(|i| {
                let last = self.last_progress_ms[i].load(Ordering::Relaxed);
                (now_ms.saturating_sub(last) > timeout_ms).then(|| {
                    (i, self.current_op[i].load(Ordering::Relaxed), now_ms - last)
                })
            })
            .collect()
    }

    fn all_done(&self) -> bool {
        self.done.iter().all(|d| d.load(Ordering::Relaxed))
    }
}

// =============================================================================
// Workload
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Workload {
    writers: usize,
    scanners: usize,
    ops_per_writer: usize,
    rows: usize,
    branches: usize,
}

impl Workload {
    fn from_args() -> Self {
        let mut args = env::args().skip(1).map(|a| a.parse::<usize>().ok());
        let mut next = |default: usize| args.next().flatten().unwrap_or(default);

        Self {
            writers: next(8),
            ops_per_writer: next(20_000),
            rows: next(256),
            branches: next(4),
            scanners: 2,
        }
    }
}

/// Branch tree: a chain of forks off master, then siblings.
fn setup(db: &Database, table: &Table<I64Codec>, workload: Workload) -> Result<Vec<BranchId>, StoreError> {
    for row in 0..workload.rows {
        db.insert(table, &vec![row as i64, 0], MASTER)?;
    }

    let mut branches = vec![MASTER];
    for b in 0..workload.branches {
        let parent = if b % 2 == 0 { MASTER } else { branches[branches.len() - 1] };
        branches.push(db.create_branch(&format!("b{b}"), parent)?);
    }
    Ok(branches)
}

fn run(workload: Workload) -> Result<(), StoreError> {
    println!("\n{}", "=".repeat(80));
    println!("{workload:?}");
    println!("{}", "=".repeat(80));

    let db = Arc::new(Database::with_config(StoreConfig::from_env()));
    let table = db.create_table("workload", I64Codec::new(2))?;
    let branches = Arc::new(setup(&db, &table, workload)?);

    let threads = workload.writers + workload.scanners;
    let progress = Arc::new(ThreadProgress::new(threads));
    let stop = Arc::new(AtomicBool::new(false));
    let rejected = Arc::new(AtomicUsize::new(0));
    let scanned = Arc::new(AtomicUsize::new(0));

    let watchdog = {
        let progress = Arc::clone(&progress);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                for (thread_id, op, stall_ms) in progress.report_stuck(2000) {
                    eprintln!("!!! STUCK: thread {thread_id} at op {op} for {stall_ms}ms");
                }
                if progress.all_done() {
                    break;
                }
            }
        })
    };

    let start = Instant::now();

    let writers: Vec<_> = (0..workload.writers)
        .map(|t| {
            let db = Arc::clone(&db);
            let table = Arc::clone(&table);
            let branches = Arc::clone(&branches);
            let progress = Arc::clone(&progress);
            let rejected = Arc::clone(&rejected);
            thread::spawn(move || {
                let branch = branches[t % branches.len()];
                let mut state = (t as u64 + 1).wrapping_mul(0x517c_c1b7_2722_0a95);

                for op in 0..workload.ops_per_writer {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1);
                    let tid = RowId::Master((state >> 33) as u32 % workload.rows as u32);

                    progress.update(t, op);
                    let result = if op % 64 == 63 {
                        db.delete(&table, tid, branch)
                    } else {
                        db.update(&table, tid, &vec![i64::from(tid.index()), op as i64], branch)
                    };
                    if result.is_err() {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }

                progress.mark_done(t);
            })
        })
        .collect();

    let scanners: Vec<_> = (0..workload.scanners)
        .map(|s| {
            let db = Arc::clone(&db);
            let table = Arc::clone(&table);
            let branches = Arc::clone(&branches);
            let progress = Arc::clone(&progress);
            let scanned = Arc::clone(&scanned);
            let slot = workload.writers + s;
            thread::spawn(move || -> Result<(), StoreError> {
                let mut round = 0;
                while !progress.done[..workload.writers]
                    .iter()
                    .all(|d| d.load(Ordering::Relaxed))
                {
                    progress.update(slot, round);
                    let branch = branches[round % branches.len()];
                    let ctx = db.context(branch)?;
                    let rows = if round % 2 == 0 {
                        db.scan_latest(&table, &ctx).count()
                    } else {
                        db.scan_earliest(&table, &ctx).count()
                    };
                    scanned.fetch_add(rows, Ordering::Relaxed);
                    round += 1;
                }
                progress.mark_done(slot);
                Ok(())
            })
        })
        .collect();

    for handle in writers {
        let _ = handle.join();
    }
    for handle in scanners {
        if let Ok(Err(err)) = handle.join() {
            eprintln!("scanner failed: {err}");
        }
    }

    stop.store(true, Ordering::Relaxed);
    let _ = watchdog.join();

    let elapsed = start.elapsed();
    let ops = workload.writers * workload.ops_per_writer;
    println!(
        "DONE: {ops} writes in {elapsed:?} ({:.0} writes/sec), {} rejected, {} rows scanned",
        ops as f64 / elapsed.as_secs_f64(),
        rejected.load(Ordering::Relaxed),
        scanned.load(Ordering::Relaxed),
    );
    println!(
        "chains: {} master rows, {} dangling rows, {} archived nodes",
        table.len_master(),
        table.len_dangling(),
        table.archived_nodes()
    );

    for &branch in branches.iter() {
        let ctx = db.context(branch)?;
        let visible = db.scan_latest(&table, &ctx).filter(Result::is_ok).count();
        println!("  branch {branch}: {visible} visible rows");
    }
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    init_tracing();

    eprintln!("branchstore concurrent workload");
    eprintln!("===============================");
    eprintln!("Watchdog will report any thread stuck for >2 seconds.");

    if let Err(err) = run(Workload::from_args()) {
        eprintln!("workload failed: {err}");
        std::process::exit(1);
    }
}
