use std::collections::HashMap;

use parking_lot::Mutex;

use super::store::PageStore;
use crate::types::{page::DEFAULT_PAGE_SIZE, ArborError, PageId, Result};

#[derive(Default)]
struct MemInner {
    pages: HashMap<PageId, Box<[u8]>>,
    free: Vec<PageId>,
    next_page: u64,
    writes: u64,
}

/// Heap-resident page store.
///
/// Keeps the latest image of every written page and recycles freed ids.
pub struct MemStore {
    page_size: usize,
    inner: Mutex<MemInner>,
}

impl MemStore {
    /// Creates an empty store with the given page size.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            inner: Mutex::new(MemInner {
                next_page: 1,
                ..MemInner::default()
            }),
        }
    }

    /// Number of pages currently holding an image.
    pub fn resident_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Total number of page writes received.
    pub fn writes(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Drops the image of `id`, simulating a page the store can no longer serve.
    pub fn evict(&self, id: PageId) -> bool {
        self.inner.lock().pages.remove(&id).is_some()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageStore for MemStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.free.pop() {
            return Ok(id);
        }
        let id = PageId(inner.next_page);
        inner.next_page += 1;
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        Ok(self.inner.lock().pages.get(&id).cloned())
    }

    fn write_page(&self, id: PageId, image: &[u8]) -> Result<()> {
        if image.len() != self.page_size {
            return Err(ArborError::Invalid("page image size does not match store"));
        }
        let mut inner = self.inner.lock();
        inner.pages.insert(id, image.to_vec().into_boxed_slice());
        inner.writes += 1;
        Ok(())
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pages.remove(&id);
        inner.free.push(id);
        Ok(())
    }

    fn retains_pages(&self) -> bool {
        true
    }
}
