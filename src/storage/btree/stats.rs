use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Number of leaf page visits during lookups and mutations
    pub leaf_searches: u64,
    /// Number of internal page visits during lookups and mutations
    pub internal_searches: u64,
    /// Number of leaf page splits performed
    pub leaf_splits: u64,
    /// Number of internal page splits performed
    pub internal_splits: u64,
    /// Number of times a full root was pushed down under a new root
    pub root_splits: u64,
    /// Number of leaf page merges performed
    pub leaf_merges: u64,
    /// Number of internal page merges performed
    pub internal_merges: u64,
    /// Number of empty sole children removed from their parent
    pub root_collapses: u64,
    /// Number of child pages read back from the page store
    pub page_faults: u64,
    /// Number of page images handed to the write hook
    pub pages_written: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default)]
pub struct BTreeStats {
    leaf_searches: AtomicU64,
    internal_searches: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
    leaf_merges: AtomicU64,
    internal_merges: AtomicU64,
    root_collapses: AtomicU64,
    page_faults: AtomicU64,
    pages_written: AtomicU64,
}

impl BTreeStats {
    /// Returns the current count of leaf page visits.
    pub fn leaf_searches(&self) -> u64 {
        self.leaf_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page visits.
    pub fn internal_searches(&self) -> u64 {
        self.internal_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page splits.
    pub fn internal_splits(&self) -> u64 {
        self.internal_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of root splits.
    pub fn root_splits(&self) -> u64 {
        self.root_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page merges.
    pub fn leaf_merges(&self) -> u64 {
        self.leaf_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page merges.
    pub fn internal_merges(&self) -> u64 {
        self.internal_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of collapsed sole children.
    pub fn root_collapses(&self) -> u64 {
        self.root_collapses.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of pages faulted in from the store.
    pub fn page_faults(&self) -> u64 {
        self.page_faults.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of pages written through the store.
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_searches(&self, is_leaf: bool) {
        let counter = if is_leaf {
            &self.leaf_searches
        } else {
            &self.internal_searches
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_splits(&self, is_leaf: bool) {
        let counter = if is_leaf {
            &self.leaf_splits
        } else {
            &self.internal_splits
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_merges(&self, is_leaf: bool) {
        let counter = if is_leaf {
            &self.leaf_merges
        } else {
            &self.internal_merges
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_collapses(&self) {
        self.root_collapses.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_page_faults(&self) {
        self.page_faults.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_pages_written(&self, pages: u64) {
        self.pages_written.fetch_add(pages, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_searches: self.leaf_searches(),
            internal_searches: self.internal_searches(),
            leaf_splits: self.leaf_splits(),
            internal_splits: self.internal_splits(),
            root_splits: self.root_splits(),
            leaf_merges: self.leaf_merges(),
            internal_merges: self.internal_merges(),
            root_collapses: self.root_collapses(),
            page_faults: self.page_faults(),
            pages_written: self.pages_written(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "arbor::stats",
            leaf_searches = snapshot.leaf_searches,
            internal_searches = snapshot.internal_searches,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            root_splits = snapshot.root_splits,
            leaf_merges = snapshot.leaf_merges,
            internal_merges = snapshot.internal_merges,
            root_collapses = snapshot.root_collapses,
            page_faults = snapshot.page_faults,
            pages_written = snapshot.pages_written,
            "btree stats snapshot"
        );
    }
}
