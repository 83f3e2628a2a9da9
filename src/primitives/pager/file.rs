use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::store::PageStore;
use crate::types::{ArborError, PageId, Result};

struct FileInner {
    file: File,
    len: u64,
    next_page: u64,
    free: Vec<PageId>,
}

/// Page store backed by a single file of fixed-size page images.
///
/// Page `n` lives at byte offset `(n - 1) * page_size`. Freed ids are reused
/// within one process; the tree does not persist a free list.
pub struct FileStore {
    path: PathBuf,
    page_size: usize,
    inner: Mutex<FileInner>,
}

impl FileStore {
    /// Opens `path`, creating it when missing.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(ArborError::Invalid("page size must be non-zero"));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(ArborError::Corruption("file length is not a multiple of the page size"));
        }
        let next_page = len / page_size as u64 + 1;
        tracing::debug!(
            target: "arbor::pager",
            path = %path.display(),
            pages = next_page - 1,
            "opened file store"
        );
        Ok(Self {
            path,
            page_size,
            inner: Mutex::new(FileInner {
                file,
                len,
                next_page,
                free: Vec::new(),
            }),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, id: PageId) -> Result<u64> {
        if id.is_none() {
            return Err(ArborError::Invalid("page id 0 is reserved"));
        }
        (id.0 - 1)
            .checked_mul(self.page_size as u64)
            .ok_or(ArborError::Invalid("page offset overflow"))
    }
}

impl PageStore for FileStore {
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
        let off = self.offset(id)?;
        let mut inner = self.inner.lock();
        if off + self.page_size as u64 > inner.len {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.page_size].into_boxed_slice();
        inner.file.seek(SeekFrom::Start(off))?;
        inner.file.read_exact(&mut buf)?;
        if buf.iter().all(|&b| b == 0) {
            // Hole left by a page that was allocated but never written.
            return Ok(None);
        }
        Ok(Some(buf))
    }

    fn write_page(&self, id: PageId, image: &[u8]) -> Result<()> {
        if image.len() != self.page_size {
            return Err(ArborError::Invalid("page image size does not match store"));
        }
        let off = self.offset(id)?;
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(off))?;
        inner.file.write_all(image)?;
        let end = off + self.page_size as u64;
        if end > inner.len {
            inner.len = end;
        }
        Ok(())
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        self.offset(id)?;
        self.inner.lock().free.push(id);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn retains_pages(&self) -> bool {
        true
    }
}
