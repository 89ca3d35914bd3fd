//! The PageIO layer (component 1 of the engine): fixed-size physical pages
//! read and written positionally against a single growing file, chained
//! into logical records, with free-page recycling.

mod cache;
#[cfg(test)]
mod test;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Mutex;

use bytes::Bytes;

use crate::page::{self, Offset, PageIo};
use crate::{Error, Result};

use cache::PageCache;

/// Positional file I/O, abstracted so the pager can run against a real
/// file or an in-memory mock in tests.
///
/// Methods take `&self`: concurrent readers and the single writer share
/// one handle, and positional reads/writes don't disturb each other's
/// logical cursor (there is no shared cursor — every call names its own
/// offset).
pub trait File: Send + Sync {
    /// Current length of the file in bytes.
    fn len(&self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Write exactly `buf.len()` bytes starting at `offset`, growing the
    /// file if `offset + buf.len()` is past the current end.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    /// Flush buffered writes to durable storage.
    fn sync_data(&self) -> Result<()>;
}

impl File for std::fs::File {
    fn len(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.read_exact_at(buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::EndOfFile
            } else {
                Error::Io(e)
            }
        })
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync_data(&self) -> Result<()> {
        std::fs::File::sync_data(self)?;
        Ok(())
    }
}

/// Mutable bookkeeping guarded by a single lock: the free-list head and
/// the current extent of the file in whole pages. Reads never touch this;
/// only `allocate`/`push_free` do, and those only ever run under the
/// `RecordManager`'s writer lock.
struct AllocState {
    page_count: u64,
    first_free_page: Option<Offset>,
    /// `Some` while a transaction wants every offset handed out by
    /// `allocate` recorded, so `rollback` can return them to the free
    /// list without threading an accumulator through every call site
    /// that serializes a page (§4.5 "Rollback ... return allocatedPages").
    recording: Option<Vec<Offset>>,
}

/// Owns the file handle, the read cache, and free-page bookkeeping. This is
/// the "RecordManager owns the file" substrate described in §4.1 of the
/// design: fetch/allocate/flush/read_chain are its whole public contract.
pub struct PageStore<F> {
    file: F,
    page_size: u32,
    alloc: Mutex<AllocState>,
    cache: Mutex<PageCache>,
}

impl<F: File> PageStore<F> {
    /// Open a store over an existing file whose length is already a whole
    /// number of `page_size`-sized pages.
    pub fn open(file: F, page_size: u32, first_free_page: Option<Offset>) -> Result<Self> {
        page::validate_page_size(page_size)?;
        let len = file.len()?;
        if len % page_size as u64 != 0 {
            return Err(Error::InvalidBTree(
                "file length is not a whole number of pages".into(),
            ));
        }
        let page_count = len / page_size as u64;
        Ok(Self {
            file,
            page_size,
            alloc: Mutex::new(AllocState {
                page_count,
                first_free_page,
                recording: None,
            }),
            cache: Mutex::new(PageCache::new(1024)),
        })
    }

    /// Start a store over a brand-new, empty file: slot 0 is reserved for
    /// the global header.
    pub fn create(file: F, page_size: u32) -> Result<Self> {
        page::validate_page_size(page_size)?;
        Ok(Self {
            file,
            page_size,
            alloc: Mutex::new(AllocState {
                page_count: 1,
                first_free_page: None,
                recording: None,
            }),
            cache: Mutex::new(PageCache::new(1024)),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn first_free_page(&self) -> Option<Offset> {
        self.alloc.lock().unwrap().first_free_page
    }

    pub fn set_first_free_page(&self, offset: Option<Offset>) {
        self.alloc.lock().unwrap().first_free_page = offset;
    }

    /// Start recording every offset handed out by `allocate` until
    /// `take_recorded` is called. A transaction calls this at `begin`.
    pub fn begin_recording(&self) {
        self.alloc.lock().unwrap().recording = Some(Vec::new());
    }

    /// Stop recording and return everything allocated since
    /// `begin_recording`, for `rollback` to push back onto the free list.
    pub fn take_recorded(&self) -> Vec<Offset> {
        self.alloc.lock().unwrap().recording.take().unwrap_or_default()
    }

    fn check_offset(&self, offset: Offset) -> Result<()> {
        let page_count = self.alloc.lock().unwrap().page_count;
        if offset % self.page_size as u64 != 0 || offset >= page_count * self.page_size as u64 {
            return Err(Error::InvalidOffset(offset));
        }
        Ok(())
    }

    /// Read exactly `pageSize` bytes positionally.
    pub fn fetch(&self, offset: Offset) -> Result<PageIo> {
        self.check_offset(offset)?;

        if let Some(bytes) = self.cache.lock().unwrap().get(offset) {
            return Ok(PageIo::from_bytes(offset, bytes));
        }

        let mut buf = vec![0u8; self.page_size as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        let bytes = Bytes::from(buf);

        self.cache.lock().unwrap().insert(offset, bytes.clone());

        Ok(PageIo::from_bytes(offset, bytes))
    }

    /// Return a free page, preferring the free list; otherwise extend the
    /// file by one page. The returned page is zero-length with no
    /// successor, per §4.1.
    pub fn allocate(&self) -> Result<PageIo> {
        let mut alloc = self.alloc.lock().unwrap();

        if let Some(head) = alloc.first_free_page {
            drop(alloc);
            let head_page = self.fetch(head)?;
            let next = head_page.next_page_offset();
            self.cache.lock().unwrap().invalidate(head);
            let mut alloc = self.alloc.lock().unwrap();
            alloc.first_free_page = next;
            if let Some(recorded) = alloc.recording.as_mut() {
                recorded.push(head);
            }
            return Ok(PageIo::zeroed(head, self.page_size as usize));
        }

        let offset = alloc.page_count * self.page_size as u64;
        alloc.page_count += 1;
        if let Some(recorded) = alloc.recording.as_mut() {
            recorded.push(offset);
        }
        Ok(PageIo::zeroed(offset, self.page_size as usize))
    }

    /// Write each page at its offset and refresh the read cache.
    pub fn flush(&self, pages: &[PageIo]) -> Result<()> {
        for page in pages {
            self.check_offset(page.offset())?;
            self.file.write_all_at(page.buf(), page.offset())?;
            self.cache
                .lock()
                .unwrap()
                .insert(page.offset(), Bytes::copy_from_slice(page.buf()));
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()
    }

    /// Push `offset` onto the head of the free list. Callers only ever do
    /// this from the commit path, after a page has been fully shadowed and
    /// is no longer reachable from any retained revision.
    pub fn push_free(&self, offset: Offset) -> Result<()> {
        let head = self.first_free_page();
        let mut page = PageIo::zeroed(offset, self.page_size as usize);
        page.set_next_page_offset(head);
        self.flush(std::slice::from_ref(&page))?;
        self.set_first_free_page(Some(offset));
        Ok(())
    }

    /// Walk a page chain starting at `offset`, stopping once `limit` bytes
    /// of payload have been collected or the chain ends.
    pub fn read_chain(&self, offset: Offset, limit: usize) -> Result<Vec<PageIo>> {
        let mut pages = Vec::new();
        let mut next = Some(offset);
        let mut collected = 0usize;
        let mut index = 0usize;

        while let Some(o) = next {
            let page = self.fetch(o)?;
            collected += page::payload_capacity(self.page_size as usize, index);
            next = page.next_page_offset();
            pages.push(page);
            index += 1;

            if collected >= limit {
                break;
            }
        }

        if collected < limit {
            return Err(Error::EndOfFile);
        }

        Ok(pages)
    }

    pub fn page_count(&self) -> u64 {
        self.alloc.lock().unwrap().page_count
    }
}
