use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::types::{page::DEFAULT_PAGE_SIZE, PageId, Result};

/// Capability the tree uses to allocate, fetch and persist page images.
///
/// Implementations must be synchronous. The tree serializes all calls it makes,
/// so a store only needs interior mutability, not its own transaction model.
pub trait PageStore: 'static {
    /// Returns the page size in bytes.
    fn page_size(&self) -> usize;

    /// Reserves a fresh page id. Ids start at 1.
    fn allocate_page(&self) -> Result<PageId>;

    /// Fetches the image of `id`, or `None` when the page is not resident.
    fn read_page(&self, id: PageId) -> Result<Option<Box<[u8]>>>;

    /// Records the latest image of `id`.
    fn write_page(&self, id: PageId, image: &[u8]) -> Result<()>;

    /// Releases `id` after the tree deleted the page.
    fn free_page(&self, id: PageId) -> Result<()> {
        let _ = id;
        Ok(())
    }

    /// Makes previously written pages durable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Whether a written page can later be read back.
    fn retains_pages(&self) -> bool {
        false
    }
}

/// Store that keeps nothing: reads always miss and writes are discarded.
///
/// This is the page store of a purely in-memory tree, where every child is
/// resident and the write hook is only a notification.
#[derive(Debug)]
pub struct NullStore {
    page_size: usize,
    next_page: AtomicU64,
}

impl NullStore {
    /// Creates a store reporting the given page size.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_page: AtomicU64::new(1),
        }
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageStore for NullStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        Ok(PageId(self.next_page.fetch_add(1, AtomicOrdering::Relaxed)))
    }

    fn read_page(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        tracing::trace!(target: "arbor::pager", page = id.0, "null store read miss");
        Ok(None)
    }

    fn write_page(&self, _id: PageId, _image: &[u8]) -> Result<()> {
        Ok(())
    }
}
