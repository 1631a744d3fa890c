//! Per-row version chains.
//!
//! Every physical row owns one [`VersionHead`]. The head describes the value
//! currently stored in the row's column slots and is the entry point to a
//! chain of [`ArchivedNode`]s holding older master values and branch-local
//! values. Nodes live in a per-chain arena and are addressed by
//! [`NodeHandle`]; dropping the head drops the arena.
//!
//! # Links
//!
//! ```text
//! head_ref      Head (row value is freshest) | Node (a branch value is)
//! history_next  next-older node in recency order, across all branches
//! branch_next   the value this one replaced, as seen by its own branch
//! tail_ref      first node pushed since head_ref was last Head; its
//!               history_next is the one Head link a master update rewires
//! ```
//!
//! Walking `history_next` from `head_ref` visits every version newest first.
//! Walking `branch_next` from any version visits its own revision history.
//!
//! # Historical Head Links
//!
//! The head's content is overwritten in place by master updates. A branch
//! node whose predecessor was the head stores `branch_next = Head` together
//! with its write stamp; following that link resolves to the newest master
//! version written before the node, which is the head itself or one of the
//! nodes on the head's own `branch_next` chain.
//!
//! # Concurrency
//!
//! All head fields are atomics and node content is immutable except for
//! `history_next`. Writers hold the head's [`OptimisticLock`]; readers go
//! through [`ChainView`] and validate the lock version afterwards. Readers
//! can observe a half-spliced chain, so traversals are bounded by the arena
//! size and report [`Search::Retry`] instead of looping.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::bitset::BranchBitset;
use crate::branch::{BranchId, MASTER};
use crate::lineage::Lineage;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::tracing_helpers::trace_log;
use crate::versionlock::{OptimisticLock, WriteGuard};

// ============================================================================
//  Handles and Links
// ============================================================================

/// Raw encoding of [`Link::Null`].
const LINK_NULL: u64 = u64::MAX;

/// Raw encoding of [`Link::Head`].
const LINK_HEAD: u64 = u64::MAX - 1;

/// Index of an archived node within its chain's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    /// Handle for arena slot `index`, or `None` past the last `u32`.
    #[inline]
    #[must_use]
    pub fn for_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    /// Arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A reference stored in a chain field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    /// End of chain.
    Null,
    /// The version head.
    Head,
    /// An archived node.
    Node(NodeHandle),
}

impl Link {
    #[inline(always)]
    const fn to_raw(self) -> u64 {
        match self {
            Self::Null => LINK_NULL,
            Self::Head => LINK_HEAD,
            Self::Node(handle) => handle.0 as u64,
        }
    }

    #[inline(always)]
    const fn from_raw(raw: u64) -> Self {
        match raw {
            LINK_NULL => Self::Null,
            LINK_HEAD => Self::Head,
            #[allow(clippy::cast_possible_truncation, reason = "handles are pushed as u32")]
            index => Self::Node(NodeHandle(index as u32)),
        }
    }
}

impl From<VersionRef> for Link {
    fn from(version: VersionRef) -> Self {
        match version {
            VersionRef::Head => Self::Head,
            VersionRef::Node(handle) => Self::Node(handle),
        }
    }
}

/// Atomic [`Link`] cell.
#[derive(Debug)]
struct AtomicLink(AtomicU64);

impl AtomicLink {
    const fn new(link: Link) -> Self {
        Self(AtomicU64::new(link.to_raw()))
    }

    #[inline(always)]
    fn load(&self) -> Link {
        Link::from_raw(self.0.load(READ_ORD))
    }

    #[inline(always)]
    fn store(&self, link: Link) {
        self.0.store(link.to_raw(), WRITE_ORD);
    }
}

/// Where traversal starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadPointer {
    /// The row's current value is the freshest version.
    SelfFresh,
    /// A branch-local value was written after the row's current value.
    Archived(NodeHandle),
}

/// A version found by a traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionRef {
    /// The value in the row's column slots.
    Head,
    /// An archived node's payload.
    Node(NodeHandle),
}

/// Outcome of a chain traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Search<T> {
    /// A visible version.
    Found(T),
    /// No visible version (or the visible one is a tombstone).
    Missing,
    /// The chain looked inconsistent. Only possible for optimistic readers;
    /// redo the read after validation fails.
    Retry,
}

impl<T> Search<T> {
    /// Map the found value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Search<U> {
        match self {
            Self::Found(value) => Search::Found(f(value)),
            Self::Missing => Search::Missing,
            Self::Retry => Search::Retry,
        }
    }

    /// Chain a traversal on the found value.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Search<U>) -> Search<U> {
        match self {
            Self::Found(value) => f(value),
            Self::Missing => Search::Missing,
            Self::Retry => Search::Retry,
        }
    }
}

// ============================================================================
//  ArchivedNode
// ============================================================================

/// One historical or branch-local value.
///
/// Immutable after creation except `history_next`, which a master update
/// rewires on the tail node.
#[derive(Debug)]
pub struct ArchivedNode {
    history_next: AtomicLink,
    branch_next: Link,
    branch_id: BranchId,
    creation_ts: u32,
    stamp: u64,
    tombstone: bool,
    payload: Box<[u8]>,
}

impl ArchivedNode {
    /// Branch that wrote this value.
    #[inline]
    #[must_use]
    pub const fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Highest branch id when this value was written.
    #[inline]
    #[must_use]
    pub const fn creation_ts(&self) -> u32 {
        self.creation_ts
    }

    /// Whether this value is a deletion marker.
    #[inline]
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Encoded row bytes. Empty for tombstones.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Next-older version in recency order.
    #[inline]
    #[must_use]
    pub fn history_next(&self) -> Link {
        self.history_next.load()
    }

    /// The version this one replaced on its own branch.
    #[inline]
    #[must_use]
    pub const fn branch_next(&self) -> Link {
        self.branch_next
    }
}

// ============================================================================
//  VersionHead
// ============================================================================

/// Chain entry point stored alongside a row's column slots.
#[derive(Debug)]
pub struct VersionHead {
    lock: OptimisticLock,

    head_ref: AtomicLink,
    tail_ref: AtomicLink,
    history_next: AtomicLink,
    branch_next: AtomicLink,

    /// Writer and logical time of the value in the column slots.
    branch_id: AtomicU32,
    creation_ts: AtomicU32,
    stamp: AtomicU64,
    tombstone: AtomicBool,

    /// Next write stamp. Only advanced under the lock.
    writes: AtomicU64,

    /// Branches owning at least one version in this chain.
    visibility: RwLock<BranchBitset>,

    arena: RwLock<Vec<ArchivedNode>>,
}

impl VersionHead {
    /// Head for a freshly inserted row: no history, owned by `branch`.
    #[must_use]
    pub fn new(branch: BranchId, creation_ts: u32) -> Self {
        Self {
            lock: OptimisticLock::new(),
            head_ref: AtomicLink::new(Link::Head),
            tail_ref: AtomicLink::new(Link::Null),
            history_next: AtomicLink::new(Link::Null),
            branch_next: AtomicLink::new(Link::Null),
            branch_id: AtomicU32::new(branch),
            creation_ts: AtomicU32::new(creation_ts),
            stamp: AtomicU64::new(0),
            tombstone: AtomicBool::new(false),
            writes: AtomicU64::new(1),
            visibility: RwLock::new(BranchBitset::singleton(branch)),
            arena: RwLock::new(Vec::new()),
        }
    }

    /// The lock guarding this chain.
    #[inline]
    #[must_use]
    pub const fn lock(&self) -> &OptimisticLock {
        &self.lock
    }

    /// Branch that wrote the value in the column slots.
    #[inline]
    #[must_use]
    pub fn branch_id(&self) -> BranchId {
        self.branch_id.load(READ_ORD)
    }

    /// Logical time of the value in the column slots.
    #[inline]
    #[must_use]
    pub fn creation_ts(&self) -> u32 {
        self.creation_ts.load(READ_ORD)
    }

    /// Whether master deleted this row.
    #[inline]
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.tombstone.load(READ_ORD)
    }

    /// Traversal entry point.
    #[must_use]
    pub fn head_ref(&self) -> HeadPointer {
        match self.head_ref.load() {
            Link::Node(handle) => HeadPointer::Archived(handle),
            Link::Head | Link::Null => HeadPointer::SelfFresh,
        }
    }

    /// Splice point for the next master update.
    #[must_use]
    pub fn tail_ref(&self) -> Option<NodeHandle> {
        match self.tail_ref.load() {
            Link::Node(handle) => Some(handle),
            Link::Head | Link::Null => None,
        }
    }

    /// Next-older version after the row's current value.
    #[must_use]
    pub fn history_next(&self) -> Link {
        self.history_next.load()
    }

    /// Previous master value.
    #[must_use]
    pub fn branch_next(&self) -> Link {
        self.branch_next.load()
    }

    /// Snapshot of the owning-branch bitset.
    #[must_use]
    pub fn visibility(&self) -> BranchBitset {
        self.visibility.read().clone()
    }

    /// Number of archived nodes in this chain.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.read().len()
    }

    /// Cheap pre-filter: `false` guarantees no version is visible.
    #[inline]
    #[must_use]
    pub fn has_lineage_intersection(&self, lineage: &Lineage) -> bool {
        lineage.intersects(&self.visibility.read())
    }

    /// Open a read view over the chain.
    ///
    /// Holds the arena's read lock; drop the view before calling a mutation.
    #[must_use]
    pub fn view(&self) -> ChainView<'_> {
        ChainView {
            head: self,
            nodes: self.arena.read(),
        }
    }

    // ========================================================================
    //  Mutation (write lock held)
    // ========================================================================

    fn next_stamp(&self) -> u64 {
        self.writes.fetch_add(1, RELAXED)
    }

    fn push_node(&self, node: ArchivedNode) -> Option<NodeHandle> {
        let mut arena = self.arena.write();
        let handle = NodeHandle::for_index(arena.len())?;
        arena.push(node);
        Some(handle)
    }

    /// Archive the row's current value ahead of a master write.
    ///
    /// `old_payload` must be the bytes currently in the column slots. After
    /// this call the head describes a master value written at `creation_ts`;
    /// the caller then overwrites the column slots (or, for `tombstone`,
    /// leaves them as they are).
    ///
    /// # Returns
    /// `None` if the arena is out of handles; no version is added.
    #[must_use]
    pub fn archive_master(
        &self,
        guard: &WriteGuard<'_>,
        old_payload: Box<[u8]>,
        creation_ts: u32,
        tombstone: bool,
    ) -> Option<NodeHandle> {
        debug_assert!(guard.guards(&self.lock), "archive_master without this chain's lock");

        let stamp = self.next_stamp();
        let node = ArchivedNode {
            history_next: AtomicLink::new(self.history_next.load()),
            branch_next: self.branch_next.load(),
            branch_id: self.branch_id.load(RELAXED),
            creation_ts: self.creation_ts.load(RELAXED),
            stamp: self.stamp.load(RELAXED),
            tombstone: self.tombstone.load(RELAXED),
            payload: old_payload,
        };
        let handle = self.push_node(node)?;

        match self.head_ref.load() {
            Link::Node(freshest) => {
                // The tail's history_next is the only Head link in the
                // recency chain; it now has to reach the archived value.
                match self.tail_ref.load() {
                    Link::Node(tail) => {
                        let arena = self.arena.read();
                        if let Some(tail_node) = arena.get(tail.index()) {
                            tail_node.history_next.store(Link::Node(handle));
                        }
                    }
                    Link::Head | Link::Null => {
                        debug_assert!(false, "branch-fresh head without a tail");
                    }
                }
                self.history_next.store(Link::Node(freshest));
            }
            Link::Head | Link::Null => {
                self.history_next.store(Link::Node(handle));
            }
        }

        self.branch_next.store(Link::Node(handle));
        self.tail_ref.store(Link::Null);
        self.branch_id.store(MASTER, WRITE_ORD);
        self.creation_ts.store(creation_ts, WRITE_ORD);
        self.stamp.store(stamp, WRITE_ORD);
        self.tombstone.store(tombstone, WRITE_ORD);
        self.visibility.write().insert(MASTER);

        // Entry point last: a reader that already passed it sees a complete node.
        self.head_ref.store(Link::Head);

        trace_log!(node = handle.index(), creation_ts, tombstone, "archive_master");
        Some(handle)
    }

    /// Push a branch-local value (or tombstone) in front of the chain.
    ///
    /// `predecessor` is the version `branch` saw before this write, as
    /// returned by [`ChainView::latest_visible`] under the same lock.
    ///
    /// # Returns
    /// `None` if the arena is out of handles; no version is added.
    #[must_use]
    pub fn push_branch_version(
        &self,
        guard: &WriteGuard<'_>,
        branch: BranchId,
        creation_ts: u32,
        payload: Box<[u8]>,
        tombstone: bool,
        predecessor: VersionRef,
    ) -> Option<NodeHandle> {
        debug_assert!(guard.guards(&self.lock), "push_branch_version without this chain's lock");

        let entry = self.head_ref.load();
        let node = ArchivedNode {
            history_next: AtomicLink::new(entry),
            branch_next: Link::from(predecessor),
            branch_id: branch,
            creation_ts,
            stamp: self.next_stamp(),
            tombstone,
            payload,
        };
        let handle = self.push_node(node)?;

        self.visibility.write().insert(branch);

        if matches!(entry, Link::Head | Link::Null) {
            self.tail_ref.store(Link::Node(handle));
        }
        self.head_ref.store(Link::Node(handle));

        trace_log!(node = handle.index(), branch, creation_ts, tombstone, "push_branch_version");
        Some(handle)
    }
}

// ============================================================================
//  ChainView
// ============================================================================

/// Read access to a chain: the head plus a locked view of its arena.
#[derive(Debug)]
pub struct ChainView<'a> {
    head: &'a VersionHead,
    nodes: RwLockReadGuard<'a, Vec<ArchivedNode>>,
}

impl ChainView<'_> {
    /// The archived node behind `handle`.
    #[inline]
    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> Option<&ArchivedNode> {
        self.nodes.get(handle.index())
    }

    /// Number of archived nodes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the chain has no archived nodes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `lineage` observes `version`. The visibility predicate.
    #[must_use]
    pub fn is_visible(&self, version: VersionRef, lineage: &Lineage) -> bool {
        match version {
            VersionRef::Head => {
                lineage.sees(self.head.branch_id(), self.head.creation_ts())
            }
            VersionRef::Node(handle) => self
                .node(handle)
                .is_some_and(|node| lineage.sees(node.branch_id, node.creation_ts)),
        }
    }

    /// Whether `version` is a deletion marker.
    #[must_use]
    pub fn is_tombstone(&self, version: VersionRef) -> bool {
        match version {
            VersionRef::Head => self.head.is_tombstone(),
            VersionRef::Node(handle) => self.node(handle).is_some_and(|n| n.tombstone),
        }
    }

    /// Upper bound on steps for any walk over this chain.
    #[inline]
    fn step_limit(&self) -> usize {
        self.nodes.len() + 2
    }

    /// The freshest version `lineage` observes.
    ///
    /// Master short-circuits to the head: master always sees its own current
    /// value, and nothing else. A visible tombstone ends the walk with
    /// [`Search::Missing`].
    #[must_use]
    pub fn latest_visible(&self, lineage: &Lineage) -> Search<VersionRef> {
        if lineage.is_master() {
            return self.found_unless_tombstone(VersionRef::Head, lineage);
        }

        let mut link: Link = self.head.head_ref.load();
        for _ in 0..self.step_limit() {
            let next = match link {
                Link::Null => return Search::Missing,
                Link::Head => {
                    if self.is_visible(VersionRef::Head, lineage) {
                        return self.found_unless_tombstone(VersionRef::Head, lineage);
                    }
                    self.head.history_next.load()
                }
                Link::Node(handle) => {
                    let Some(node) = self.node(handle) else {
                        return Search::Retry;
                    };
                    if lineage.sees(node.branch_id, node.creation_ts) {
                        return self.found_unless_tombstone(VersionRef::Node(handle), lineage);
                    }
                    node.history_next.load()
                }
            };
            link = next;
        }

        trace_log!(nodes = self.nodes.len(), "latest_visible: step limit hit");
        Search::Retry
    }

    fn found_unless_tombstone(&self, version: VersionRef, lineage: &Lineage) -> Search<VersionRef> {
        if !self.is_visible(version, lineage) || self.is_tombstone(version) {
            Search::Missing
        } else {
            Search::Found(version)
        }
    }

    /// The oldest version reachable over `branch_next` from the latest
    /// visible one.
    #[must_use]
    pub fn earliest_visible(&self, lineage: &Lineage) -> Search<VersionRef> {
        self.latest_visible(lineage).and_then(|latest| {
            let mut current = latest;
            for _ in 0..self.step_limit() {
                match self.revision_before(current) {
                    Search::Found(older) => current = older,
                    Search::Missing => return Search::Found(current),
                    Search::Retry => return Search::Retry,
                }
            }
            Search::Retry
        })
    }

    /// Walk exactly `steps` revisions back from `start` over `branch_next`.
    ///
    /// [`Search::Missing`] when the walk runs off the end or lands on a
    /// tombstone.
    #[must_use]
    pub fn walk_revisions(&self, start: VersionRef, steps: usize) -> Search<VersionRef> {
        if steps > self.step_limit() {
            // Every revision is a distinct version; there are not that many.
            return Search::Missing;
        }

        let mut current = start;
        for _ in 0..steps {
            match self.revision_before(current) {
                Search::Found(older) => current = older,
                other => return other,
            }
        }

        if self.is_tombstone(current) {
            Search::Missing
        } else {
            Search::Found(current)
        }
    }

    /// One `branch_next` step.
    fn revision_before(&self, version: VersionRef) -> Search<VersionRef> {
        match version {
            VersionRef::Head => self.follow(self.head.branch_next.load()),
            VersionRef::Node(handle) => {
                let Some(node) = self.node(handle) else {
                    return Search::Retry;
                };
                match node.branch_next {
                    Link::Head => self.head_as_of(node.stamp),
                    link => self.follow(link),
                }
            }
        }
    }

    fn follow(&self, link: Link) -> Search<VersionRef> {
        match link {
            Link::Null => Search::Missing,
            Link::Head => Search::Found(VersionRef::Head),
            Link::Node(handle) if handle.index() < self.nodes.len() => {
                Search::Found(VersionRef::Node(handle))
            }
            Link::Node(_) => Search::Retry,
        }
    }

    /// Newest master-history version written before `stamp`.
    fn head_as_of(&self, stamp: u64) -> Search<VersionRef> {
        if self.head.stamp.load(READ_ORD) < stamp {
            return Search::Found(VersionRef::Head);
        }

        let mut link = self.head.branch_next.load();
        for _ in 0..self.step_limit() {
            match link {
                Link::Node(handle) => {
                    let Some(node) = self.node(handle) else {
                        return Search::Retry;
                    };
                    if node.stamp < stamp {
                        return Search::Found(VersionRef::Node(handle));
                    }
                    link = node.branch_next;
                }
                Link::Null => return Search::Missing,
                Link::Head => return Search::Retry,
            }
        }
        Search::Retry
    }

    /// Collect the versions on the `history_next` path, newest first.
    ///
    /// Diagnostic helper; stops early on an inconsistent chain.
    #[must_use]
    pub fn history(&self) -> Vec<VersionRef> {
        let mut out = Vec::new();
        let mut link = self.head.head_ref.load();
        for _ in 0..self.step_limit() {
            match link {
                Link::Null => break,
                Link::Head => {
                    out.push(VersionRef::Head);
                    link = self.head.history_next.load();
                }
                Link::Node(handle) => {
                    let Some(node) = self.node(handle) else { break };
                    out.push(VersionRef::Node(handle));
                    link = node.history_next.load();
                }
            }
        }
        out
    }
}
