use std::sync::Arc;

use super::codecs::{KeyCodec, ValCodec};
use super::options::TreeOptions;
use super::page::{ChildRef, Page, PageLayout};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::pager::{NullStore, PageStore};
use crate::types::{ArborError, PageId, Result};

mod erase;
mod insert;
mod verify;

pub use verify::TreeShape;

/// B+ tree with separator-by-maximum internal keys.
///
/// The root is always an internal page; an empty tree is a root with no slots.
/// Children are owned by their parent while resident and referenced by page id
/// once spilled to the page store.
pub struct Tree<K: KeyCodec, V: ValCodec> {
    root: Box<Page<K, V>>,
    ctx: TreeCtx,
    options: TreeOptions,
    len: usize,
    height: usize,
}

/// Everything a tree operation needs besides the pages themselves.
struct TreeCtx {
    store: Arc<dyn PageStore>,
    stats: Arc<BTreeStats>,
    layout: PageLayout,
    fanout: usize,
    threshold: usize,
    verify_checksum: bool,
}

impl<K: KeyCodec, V: ValCodec> Tree<K, V> {
    /// Creates an empty tree whose pages only live in memory.
    pub fn new(options: TreeOptions) -> Result<Self> {
        let store: Arc<dyn PageStore> = Arc::new(NullStore::new(options.page_size));
        Self::open_or_create(store, options)
    }

    /// Opens the tree rooted at `options.root_page`, or creates an empty one.
    pub fn open_or_create(store: Arc<dyn PageStore>, options: TreeOptions) -> Result<Self> {
        if store.page_size() != options.page_size {
            return Err(ArborError::Invalid("page size differs from the page store"));
        }
        let layout = PageLayout::for_codecs::<K, V>(options.page_size)?;
        let stats = Arc::new(BTreeStats::default());
        let (root, fanout, threshold) = match options.root_page {
            Some(root_id) => {
                let image = store
                    .read_page(root_id)?
                    .ok_or(ArborError::PageFault(root_id))?;
                let root = Page::<K, V>::decode(&image, &layout, options.checksum_verify_on_read)?;
                if root.id() != root_id {
                    return Err(ArborError::Corruption("root image carries another page id"));
                }
                if root.is_leaf() {
                    return Err(ArborError::Corruption("root page is a leaf"));
                }
                if options.fanout.is_some_and(|fanout| fanout != root.fanout()) {
                    return Err(ArborError::Invalid("fanout differs from the stored tree"));
                }
                let stored = TreeOptions {
                    fanout: Some(root.fanout()),
                    ..options.clone()
                };
                let (fanout, threshold) = stored.resolve(&layout)?;
                (root, fanout, threshold)
            }
            None => {
                let (fanout, threshold) = options.resolve(&layout)?;
                let root_id = store.allocate_page()?;
                (Page::allocate(root_id, false, fanout), fanout, threshold)
            }
        };
        let ctx = TreeCtx {
            store,
            stats,
            layout,
            fanout,
            threshold,
            verify_checksum: options.checksum_verify_on_read,
        };
        let mut tree = Self {
            root: Box::new(root),
            ctx,
            options,
            len: 0,
            height: 1,
        };
        if tree.options.root_page.is_some() {
            let shape = tree.ctx.shape_of(&tree.root)?;
            tree.len = shape.keys;
            tree.height = shape.height;
            tracing::debug!(
                target: "arbor::pager",
                root = tree.root.id().0,
                keys = shape.keys,
                height = shape.height,
                "opened tree"
            );
        }
        Ok(tree)
    }

    /// Looks up `key`. A child the page store cannot serve reads as absent.
    pub fn search(&self, key: &K) -> Option<V> {
        match self.get(key) {
            Ok(value) => value,
            Err(ArborError::PageFault(page)) => {
                tracing::trace!(target: "arbor::search", page = page.0, "child not resident");
                None
            }
            Err(err) => {
                tracing::warn!(target: "arbor::search", error = %err, "lookup failed");
                None
            }
        }
    }

    /// Looks up `key`, reporting unreadable pages as errors.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ctx.lookup(&self.root, key)
    }

    /// Returns `true` when the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of levels including the root; an empty tree has height 1.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Maximum cells per page.
    pub fn fanout(&self) -> usize {
        self.ctx.fanout
    }

    /// Return the root page identifier.
    pub fn root_page(&self) -> PageId {
        self.root.id()
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Page store backing the tree.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.ctx.store
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.ctx.stats.emit_tracing();
    }

    /// Writes every dirty resident page through the page store, children
    /// before parents, then syncs the store. Returns the number of pages written.
    pub fn flush(&mut self) -> Result<usize> {
        let written = self.ctx.write_back(&mut self.root)?;
        self.ctx.store.sync()?;
        self.ctx.stats.add_pages_written(written as u64);
        tracing::debug!(
            target: "arbor::pager",
            root = self.root.id().0,
            pages = written,
            "flushed tree"
        );
        Ok(written)
    }

    /// Flushes the tree and then drops every subtree below the root from
    /// memory, leaving on-disk references in its place.
    pub fn spill(&mut self) -> Result<usize> {
        if !self.ctx.store.retains_pages() {
            return Err(ArborError::Invalid("page store cannot read pages back"));
        }
        let written = self.flush()?;
        for pos in 0..self.root.len() {
            if let Some(child) = self.root.child_mut(pos) {
                *child = ChildRef::OnDisk(child.page_id());
            }
        }
        tracing::debug!(
            target: "arbor::pager",
            root = self.root.id().0,
            children = self.root.len(),
            "spilled tree"
        );
        Ok(written)
    }
}

impl TreeCtx {
    /// Reads and decodes `id` from the page store.
    fn load_page<K: KeyCodec, V: ValCodec>(&self, id: PageId) -> Result<Page<K, V>> {
        let Some(image) = self.store.read_page(id)? else {
            return Err(ArborError::PageFault(id));
        };
        let page = Page::decode(&image, &self.layout, self.verify_checksum).map_err(|err| {
            tracing::warn!(target: "arbor::pager", page = id.0, error = %err, "unreadable page");
            err
        })?;
        if page.id() != id {
            return Err(ArborError::Corruption("page image carries another page id"));
        }
        if page.fanout() != self.fanout {
            return Err(ArborError::Corruption("page fanout differs from tree fanout"));
        }
        self.stats.inc_page_faults();
        tracing::trace!(target: "arbor::pager", page = id.0, leaf = page.is_leaf(), "faulted page in");
        Ok(page)
    }

    /// Makes the child resident, replacing an on-disk reference with the page.
    fn swizzle<'a, K: KeyCodec, V: ValCodec>(
        &self,
        child: &'a mut ChildRef<K, V>,
    ) -> Result<&'a mut Page<K, V>> {
        if let ChildRef::OnDisk(id) = *child {
            let page = self.load_page(id)?;
            *child = ChildRef::InMemory(Box::new(page));
        }
        match child {
            ChildRef::InMemory(page) => Ok(page),
            ChildRef::OnDisk(_) => Err(ArborError::Corruption("child not resident after fault")),
        }
    }

    /// Resident child in slot `pos` of an internal page.
    fn child_page<'a, K: KeyCodec, V: ValCodec>(
        &self,
        page: &'a mut Page<K, V>,
        pos: usize,
    ) -> Result<&'a mut Page<K, V>> {
        let child = page
            .child_mut(pos)
            .ok_or(ArborError::Corruption("internal cell without child"))?;
        self.swizzle(child)
    }

    fn lookup<K: KeyCodec, V: ValCodec>(&self, page: &Page<K, V>, key: &K) -> Result<Option<V>> {
        self.stats.inc_searches(page.is_leaf());
        let pos = page.lower_bound(key, self.threshold);
        tracing::trace!(
            target: "arbor::search",
            page = page.id().0,
            leaf = page.is_leaf(),
            slot = pos,
            "search page"
        );
        if pos == page.len() {
            return Ok(None);
        }
        if page.is_leaf() {
            if page.key(pos) != key {
                return Ok(None);
            }
            return Ok(page.data(pos).cloned());
        }
        match page.child(pos) {
            Some(ChildRef::InMemory(child)) => self.lookup(child, key),
            Some(ChildRef::OnDisk(id)) => {
                let child = self.load_page::<K, V>(*id)?;
                self.lookup(&child, key)
            }
            None => Err(ArborError::Corruption("internal cell without child")),
        }
    }

    fn write_back<K: KeyCodec, V: ValCodec>(&self, page: &mut Page<K, V>) -> Result<usize> {
        let mut written = 0;
        if !page.is_leaf() {
            for pos in 0..page.len() {
                if let Some(ChildRef::InMemory(child)) = page.child_mut(pos) {
                    written += self.write_back(child)?;
                }
            }
        }
        if page.is_dirty() {
            let image = page.encode(&self.layout)?;
            self.store.write_page(page.id(), &image)?;
            page.mark_clean();
            written += 1;
        }
        Ok(written)
    }
}
