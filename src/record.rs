//! The serialization layer (§4.2): typed big-endian accessors over a
//! logical record — a virtual byte stream formed by concatenating a
//! [`PageIo`] chain's payload regions. Handles values that straddle a page
//! boundary transparently, which is why every primitive goes through
//! [`RecordReader::read_into`] / [`RecordWriter::write_bytes`] rather than
//! being special-cased per width.

use crate::page::{self, Offset, PageIo};
use crate::pager::{File, PageStore};
use crate::{Error, Result};

/// Builds a new page chain for a logical record, allocating pages from a
/// [`PageStore`] as earlier ones fill up.
pub struct RecordWriter<'s, F> {
    store: &'s PageStore<F>,
    pages: Vec<PageIo>,
    page_size: usize,
    used_in_current: usize,
    total_len: u64,
}

impl<'s, F: File> RecordWriter<'s, F> {
    /// Start a new record using `first` as the head of its chain. `first`
    /// is typically a page the caller just got from [`PageStore::allocate`].
    pub fn new(store: &'s PageStore<F>, first: PageIo) -> Self {
        let page_size = first.page_size();
        Self {
            store,
            pages: vec![first],
            page_size,
            used_in_current: 0,
            total_len: 0,
        }
    }

    pub fn offset(&self) -> Offset {
        self.pages[0].offset()
    }

    fn current_index(&self) -> usize {
        self.pages.len() - 1
    }

    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let idx = self.current_index();
            let cap = page::payload_capacity(self.page_size, idx);

            if self.used_in_current == cap {
                let mut next_page = self.store.allocate()?;
                if next_page.page_size() != self.page_size {
                    return Err(Error::InvalidBTree(
                        "allocated page size does not match record's page size".into(),
                    ));
                }
                let next_offset = next_page.offset();
                next_page.set_next_page_offset(None);
                self.pages[idx].set_next_page_offset(Some(next_offset));
                self.pages.push(next_page);
                self.used_in_current = 0;
                continue;
            }

            let start = page::payload_start(idx) + self.used_in_current;
            let room = cap - self.used_in_current;
            let n = room.min(data.len());

            self.pages[idx].buf_mut()[start..start + n].copy_from_slice(&data[..n]);

            self.used_in_current += n;
            self.total_len += n as u64;
            data = &data[n..];
        }
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_offset(&mut self, v: Option<Offset>) -> Result<()> {
        self.write_i64(page::encode_offset(v))
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    /// `len == 0` denotes "absent" per §4.2; callers that need to store an
    /// empty-but-present blob must encode that distinction themselves.
    pub fn write_blob(&mut self, data: &[u8]) -> Result<()> {
        self.write_u32(data.len() as u32)?;
        self.write_bytes(data)
    }

    /// Finalize the chain: stamp the head page's `logicalSize` and hand
    /// back every page so the caller can flush them in one batch. The last
    /// page already has no successor since it was allocated zeroed.
    pub fn finish(mut self) -> Vec<PageIo> {
        let total_len = self.total_len;
        self.pages[0].set_logical_size(total_len as u32);
        self.pages
    }
}

/// Reads typed big-endian values out of an already-fetched page chain.
pub struct RecordReader {
    pages: Vec<PageIo>,
    page_size: usize,
    pos: u64,
}

impl RecordReader {
    pub fn new(pages: Vec<PageIo>) -> Self {
        let page_size = pages.first().map(|p| p.page_size()).unwrap_or(0);
        Self {
            pages,
            page_size,
            pos: 0,
        }
    }

    pub fn into_pages(self) -> Vec<PageIo> {
        self.pages
    }

    fn read_into(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let (idx, offset_in_payload) = page::locate_virtual(self.page_size, self.pos);
            let page = self.pages.get(idx).ok_or(Error::EndOfFile)?;
            let cap = page::payload_capacity(self.page_size, idx);
            let start = page::payload_start(idx) + offset_in_payload;
            let avail = cap - offset_in_payload;
            let n = avail.min(out.len() - filled);

            out[filled..filled + n].copy_from_slice(&page.buf()[start..start + n]);

            filled += n;
            self.pos += n as u64;
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_offset(&mut self) -> Result<Option<Offset>> {
        Ok(page::decode_offset(self.read_i64()?))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::test_support::MemoryFile;

    fn store(page_size: u32) -> PageStore<MemoryFile> {
        PageStore::create(MemoryFile::default(), page_size).unwrap()
    }

    #[test]
    fn small_record_round_trips_on_one_page() {
        let store = store(512);
        let first = store.allocate().unwrap();
        let mut writer = RecordWriter::new(&store, first);
        writer.write_u64(42).unwrap();
        writer.write_blob(b"hello").unwrap();
        let offset = writer.offset();
        let pages = writer.finish();
        store.flush(&pages).unwrap();

        let head = store.fetch(offset).unwrap();
        let chain = store.read_chain(offset, head.logical_size() as usize).unwrap();
        let mut reader = RecordReader::new(chain);
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert_eq!(reader.read_blob().unwrap(), b"hello");
    }

    #[test]
    fn large_blob_spans_multiple_pages_and_round_trips() {
        let store = store(64);
        let first = store.allocate().unwrap();
        let mut writer = RecordWriter::new(&store, first);
        let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        writer.write_blob(&data).unwrap();
        let offset = writer.offset();
        let pages = writer.finish();
        assert!(pages.len() > 1, "500 bytes must overflow a 64-byte page");
        store.flush(&pages).unwrap();

        let head = store.fetch(offset).unwrap();
        let chain = store.read_chain(offset, head.logical_size() as usize).unwrap();
        let mut reader = RecordReader::new(chain);
        assert_eq!(reader.read_blob().unwrap(), data);
    }

    #[test]
    fn integer_straddling_a_page_boundary_round_trips() {
        let store = store(64);
        let first = store.allocate().unwrap();
        let mut writer = RecordWriter::new(&store, first);
        // Pad to one byte before the first page's capacity so the next u64
        // straddles the page boundary.
        writer.write_bytes(&vec![0u8; 51]).unwrap();
        writer.write_u64(0x0102030405060708).unwrap();
        let offset = writer.offset();
        let pages = writer.finish();
        store.flush(&pages).unwrap();

        let head = store.fetch(offset).unwrap();
        let chain = store.read_chain(offset, head.logical_size() as usize).unwrap();
        let mut reader = RecordReader::new(chain);
        reader.read_into(&mut [0u8; 51]).unwrap();
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
    }
}
