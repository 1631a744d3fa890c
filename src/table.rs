//! In-memory table: two append-only row arrays with per-row version chains.
//!
//! Rows are addressed by [`RowId`]. Each [`Row`] pairs its column slots (the
//! value its [`VersionHead`] describes) with the head itself. Column slots are
//! `AtomicU64` words so an optimistic reader can copy them while a writer
//! overwrites them; the head's lock version tells the reader whether the copy
//! is usable.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::RwLock;

use crate::chain::{ChainView, Search, VersionHead};
use crate::codec::{Layout, TupleCodec};
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::tid::RowId;
use crate::tracing_helpers::{error_log, trace_log};

const WORD_BYTES: usize = 8;

// ============================================================================
//  RowSlots
// ============================================================================

/// A row's column bytes packed into atomic words.
#[derive(Debug)]
pub struct RowSlots {
    words: Box<[AtomicU64]>,
    width: usize,
}

impl RowSlots {
    /// Slots holding `bytes`.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        let words: Box<[AtomicU64]> = (0..bytes.len().div_ceil(WORD_BYTES))
            .map(|_| AtomicU64::new(0))
            .collect();
        let slots = Self {
            words,
            width: bytes.len(),
        };
        slots.write_bytes(bytes);
        slots
    }

    /// Row width in bytes.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Copy the row bytes out.
    ///
    /// Without the row's write lock the copy may be torn; validate the lock
    /// version before trusting it.
    #[must_use]
    pub fn read_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * WORD_BYTES);
        for word in &*self.words {
            out.extend_from_slice(&word.load(READ_ORD).to_le_bytes());
        }
        out.truncate(self.width);
        out
    }

    /// Copy one column out. See [`RowSlots::read_bytes`].
    #[must_use]
    pub fn read_column(&self, layout: &Layout, column: usize) -> Option<Vec<u8>> {
        let range = layout.column_range(column)?;
        let bytes = self.read_bytes();
        bytes.get(range).map(<[u8]>::to_vec)
    }

    /// Overwrite the row bytes. Caller holds the row's write lock.
    ///
    /// `bytes` shorter than the row leaves the remaining bytes zeroed.
    pub fn write_bytes(&self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.width, "row overflow");

        for (index, word) in self.words.iter().enumerate() {
            let start = index * WORD_BYTES;
            let mut buf = [0u8; WORD_BYTES];
            if let Some(chunk) = bytes.get(start..bytes.len().min(start + WORD_BYTES)) {
                buf[..chunk.len()].copy_from_slice(chunk);
            }
            word.store(u64::from_le_bytes(buf), WRITE_ORD);
        }
    }
}

// ============================================================================
//  Row
// ============================================================================

/// One physical row: column slots plus the version chain describing them.
#[derive(Debug)]
pub struct Row {
    head: VersionHead,
    slots: RowSlots,
}

impl Row {
    /// A row holding `bytes`, described by `head`.
    #[must_use]
    pub fn new(head: VersionHead, bytes: &[u8]) -> Self {
        Self {
            head,
            slots: RowSlots::new(bytes),
        }
    }

    /// The row's version head.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> &VersionHead {
        &self.head
    }

    /// The row's column slots.
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> &RowSlots {
        &self.slots
    }

    /// Run `read` against a consistent snapshot of the chain and slots.
    ///
    /// Optimistic protocol: `read_lock_or_restart`, run, `validate`, redo on
    /// a failed validation. After `max_retries` failed attempts (if set) the
    /// read runs under the write lock instead.
    ///
    /// # Returns
    /// `None` if the read found nothing or the row was retired.
    pub fn read_validated<R>(
        &self,
        max_retries: Option<usize>,
        mut read: impl FnMut(&ChainView<'_>, &RowSlots) -> Search<R>,
    ) -> Option<R> {
        let lock = self.head.lock();
        let mut attempts: usize = 0;

        loop {
            if max_retries.is_some_and(|max| attempts >= max) {
                trace_log!(attempts, "read_validated: falling back to write lock");
                let _guard = lock.lock()?;
                let view = self.head.view();
                return match read(&view, &self.slots) {
                    Search::Found(value) => Some(value),
                    Search::Missing => None,
                    Search::Retry => {
                        error_log!("read_validated: inconsistent chain under write lock");
                        None
                    }
                };
            }

            let (version, restart) = lock.read_lock_or_restart();
            if restart {
                return None;
            }

            let result = {
                let view = self.head.view();
                read(&view, &self.slots)
            };

            if lock.validate(version) {
                attempts += 1;
                trace_log!(attempts, "read_validated: version changed, restarting");
                continue;
            }

            match result {
                Search::Found(value) => return Some(value),
                Search::Missing => return None,
                Search::Retry => {
                    // Validation passed, so nothing moved: the chain itself is
                    // inconsistent. Retrying would spin forever.
                    error_log!("read_validated: inconsistent chain at stable version");
                    return None;
                }
            }
        }
    }
}

// ============================================================================
//  Partition
// ============================================================================

/// Which row array a row lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    /// Master-addressable rows.
    Master,
    /// Rows created inside a non-master branch.
    Dangling,
}

#[derive(Debug, Default)]
struct Partition {
    rows: RwLock<Vec<Arc<Row>>>,
}

impl Partition {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    fn append(&self, row: Row) -> Option<u32> {
        let mut rows = self.rows.write();
        let index = u32::try_from(rows.len()).ok()?;
        rows.push(Arc::new(row));
        Some(index)
    }

    fn get(&self, index: u32) -> Option<Arc<Row>> {
        self.rows.read().get(index as usize).cloned()
    }

    fn len(&self) -> usize {
        self.rows.read().len()
    }
}

// ============================================================================
//  Table
// ============================================================================

/// A named table: codec, master rows and dangling rows.
#[derive(Debug)]
pub struct Table<C> {
    name: String,
    codec: C,
    master: Partition,
    dangling: Partition,
}

impl<C: TupleCodec> Table<C> {
    /// Empty table using `codec` for its rows.
    #[must_use]
    pub fn new(name: &str, codec: C, initial_row_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            codec,
            master: Partition::with_capacity(initial_row_capacity),
            dangling: Partition::default(),
        }
    }

    /// Table name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's codec.
    #[inline]
    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// The table's column layout.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.codec.layout()
    }

    const fn partition(&self, kind: PartitionKind) -> &Partition {
        match kind {
            PartitionKind::Master => &self.master,
            PartitionKind::Dangling => &self.dangling,
        }
    }

    /// Append a row to `kind`'s array.
    ///
    /// # Returns
    /// The new row's tid, or `None` once the array holds `u32::MAX` rows.
    pub fn append_row(&self, kind: PartitionKind, head: VersionHead, bytes: &[u8]) -> Option<RowId> {
        let index = self.partition(kind).append(Row::new(head, bytes))?;
        Some(match kind {
            PartitionKind::Master => RowId::Master(index),
            PartitionKind::Dangling => RowId::Dangling(index),
        })
    }

    /// The row behind `tid`.
    #[must_use]
    pub fn row(&self, tid: RowId) -> Option<Arc<Row>> {
        match tid {
            RowId::Master(index) => self.master.get(index),
            RowId::Dangling(index) => self.dangling.get(index),
        }
    }

    /// Current column bytes of `tid` (the head's value, whatever branch wrote
    /// it). Storage-level access; branch-aware reads go through the store.
    #[must_use]
    pub fn read_column(&self, tid: RowId, column: usize) -> Option<Vec<u8>> {
        let row = self.row(tid)?;
        row.read_validated(None, |_, slots| match slots.read_column(self.layout(), column) {
            Some(bytes) => Search::Found(bytes),
            None => Search::Missing,
        })
    }

    /// Number of master rows.
    #[must_use]
    pub fn len_master(&self) -> usize {
        self.master.len()
    }

    /// Number of dangling rows.
    #[must_use]
    pub fn len_dangling(&self) -> usize {
        self.dangling.len()
    }

    /// Total archived nodes over every chain in the table.
    #[must_use]
    pub fn archived_nodes(&self) -> usize {
        [&self.master, &self.dangling]
            .iter()
            .map(|p| p.rows.read().iter().map(|r| r.head.node_count()).sum::<usize>())
            .sum()
    }

    /// Mark every row obsolete.
    ///
    /// In-flight and later operations through surviving handles fail as if
    /// the rows did not exist.
    pub fn retire(&self) {
        for partition in [&self.master, &self.dangling] {
            for row in partition.rows.read().iter() {
                if let Some(mut guard) = row.head.lock().lock() {
                    guard.mark_obsolete();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::MASTER;
    use crate::codec::I64Codec;

    #[test]
    fn test_slots_round_trip_odd_width() {
        let bytes: Vec<u8> = (0..13).collect();
        let slots = RowSlots::new(&bytes);

        assert_eq!(slots.width(), 13);
        assert_eq!(slots.read_bytes(), bytes);

        let replacement: Vec<u8> = (100..113).collect();
        slots.write_bytes(&replacement);
        assert_eq!(slots.read_bytes(), replacement);
    }

    #[test]
    fn test_append_assigns_dense_tids() {
        let table = Table::new("t", I64Codec::new(1), 4);
        let row = table.codec().encode_row(&vec![5]).expect("encode");

        let a = table.append_row(PartitionKind::Master, VersionHead::new(MASTER, 0), &row);
        let b = table.append_row(PartitionKind::Master, VersionHead::new(MASTER, 0), &row);
        let d = table.append_row(PartitionKind::Dangling, VersionHead::new(1, 1), &row);

        assert_eq!(a, Some(RowId::Master(0)));
        assert_eq!(b, Some(RowId::Master(1)));
        assert_eq!(d, Some(RowId::Dangling(0)));
        assert_eq!((table.len_master(), table.len_dangling()), (2, 1));
        assert!(table.row(RowId::Master(2)).is_none());
    }

    #[test]
    fn test_read_column() {
        let table = Table::new("t", I64Codec::new(2), 0);
        let row = table.codec().encode_row(&vec![7, -1]).expect("encode");
        let tid = table
            .append_row(PartitionKind::Master, VersionHead::new(MASTER, 0), &row)
            .expect("append");

        assert_eq!(table.read_column(tid, 1), Some((-1i64).to_le_bytes().to_vec()));
        assert_eq!(table.read_column(tid, 2), None);
    }

    #[test]
    fn test_retire_blocks_reads() {
        let table = Table::new("t", I64Codec::new(1), 0);
        let row = table.codec().encode_row(&vec![1]).expect("encode");
        let tid = table
            .append_row(PartitionKind::Master, VersionHead::new(MASTER, 0), &row)
            .expect("append");

        table.retire();

        assert!(table.read_column(tid, 0).is_none());
        assert!(table.row(tid).is_some_and(|r| r.head().lock().is_obsolete()));
    }
}
