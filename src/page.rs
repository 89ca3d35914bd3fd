//! The physical page: a fixed-size block read and written positionally,
//! chained into logical records through [`PageIo::next_page_offset`].
//!
//! Every page reserves the same 12-byte chain header regardless of its
//! position in a chain (`nextPageOffset: i64`, `logicalSize: u32`). Only the
//! first page of a chain gives `logicalSize` any meaning; the record layer
//! (`crate::record`) reclaims the four now-unused bytes on every other page
//! of the chain as extra payload, which is why a non-head page offers
//! `pageSize - 8` usable bytes instead of `pageSize - 12`.

use bytes::{Bytes, BytesMut};

use crate::{Error, Result};

/// Byte offset of a page within the file. Always a multiple of the file's
/// page size; offset 0 is reserved for the global header.
pub type Offset = u64;

/// Fixed header every physical page carries: an 8-byte chain/free-list link
/// followed by a 4-byte logical size, meaningful only on the first page of
/// a chain.
pub const CHAIN_HEADER_LEN: usize = 12;

/// Bytes of the chain header that are always link-only, even past the first
/// page: the `logicalSize` slot becomes spare payload there.
const LINK_ONLY_LEN: usize = 8;

/// The smallest page size the format allows: the global header is 48 bytes
/// and must fit entirely within page 0.
pub const MIN_PAGE_SIZE: u32 = 64;

pub fn validate_page_size(page_size: u32) -> Result<()> {
    if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
        return Err(Error::InvalidPageSize(page_size));
    }
    Ok(())
}

/// Encode an optional offset as the on-disk sentinel: `-1` means `None`.
pub fn encode_offset(offset: Option<Offset>) -> i64 {
    match offset {
        Some(o) => o as i64,
        None => -1,
    }
}

/// Decode the on-disk sentinel back into an optional offset.
pub fn decode_offset(raw: i64) -> Option<Offset> {
    if raw < 0 {
        None
    } else {
        Some(raw as Offset)
    }
}

/// The usable payload capacity of a page at `page_index` within its chain,
/// for a file using `page_size`-byte pages. Index 0 is the head of the
/// chain; everything after it reclaims the unused `logicalSize` slot.
pub fn payload_capacity(page_size: usize, page_index: usize) -> usize {
    if page_index == 0 {
        page_size - CHAIN_HEADER_LEN
    } else {
        page_size - LINK_ONLY_LEN
    }
}

/// Byte offset within a page's buffer where its usable payload begins.
pub fn payload_start(page_index: usize) -> usize {
    if page_index == 0 {
        CHAIN_HEADER_LEN
    } else {
        LINK_ONLY_LEN
    }
}

/// Map a virtual offset into a logical record (a concatenation of a page
/// chain's payloads) to the `(pageIndex, offsetWithinPayload)` pair that
/// names the same byte, per §4.2's mapping formula.
pub fn locate_virtual(page_size: usize, virtual_pos: u64) -> (usize, usize) {
    let first_cap = (page_size - CHAIN_HEADER_LEN) as u64;
    if virtual_pos < first_cap {
        (0, virtual_pos as usize)
    } else {
        let rest = virtual_pos - first_cap;
        let cap = (page_size - LINK_ONLY_LEN) as u64;
        let index = 1 + rest / cap;
        let offset = rest % cap;
        (index as usize, offset as usize)
    }
}

/// A physical page's buffer plus the offset it was read from or will be
/// written to. Mutable while a transaction is building it; frozen into the
/// pager's read cache once flushed.
#[derive(Debug, Clone)]
pub struct PageIo {
    offset: Offset,
    buf: BytesMut,
}

impl PageIo {
    /// A freshly allocated page: zero-length chain, no successor.
    pub fn zeroed(offset: Offset, page_size: usize) -> Self {
        let mut buf = BytesMut::zeroed(page_size);
        write_i64(&mut buf, 0, -1);
        write_u32(&mut buf, 8, 0);
        Self { offset, buf }
    }

    pub fn from_bytes(offset: Offset, buf: Bytes) -> Self {
        let mut owned = BytesMut::with_capacity(buf.len());
        owned.extend_from_slice(&buf);
        Self { offset, buf: owned }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.buf.len()
    }

    pub fn next_page_offset(&self) -> Option<Offset> {
        decode_offset(read_i64(&self.buf, 0))
    }

    pub fn set_next_page_offset(&mut self, next: Option<Offset>) {
        write_i64(&mut self.buf, 0, encode_offset(next));
    }

    /// Meaningful only when this page is the head of its chain.
    pub fn logical_size(&self) -> u32 {
        read_u32(&self.buf, 8)
    }

    pub fn set_logical_size(&mut self, size: u32) {
        write_u32(&mut self.buf, 8, size);
    }

    /// The whole physical buffer, header included, as written to disk.
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Usable payload bytes for this page at `page_index` within its chain.
    pub fn payload(&self, page_index: usize) -> &[u8] {
        &self.buf[payload_start(page_index)..]
    }

    pub fn payload_mut(&mut self, page_index: usize) -> &mut [u8] {
        let start = payload_start(page_index);
        &mut self.buf[start..]
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

fn write_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_be_bytes());
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_page_has_no_successor() {
        let page = PageIo::zeroed(0, 512);
        assert_eq!(page.next_page_offset(), None);
        assert_eq!(page.logical_size(), 0);
    }

    #[test]
    fn offset_sentinel_roundtrips() {
        assert_eq!(decode_offset(encode_offset(None)), None);
        assert_eq!(decode_offset(encode_offset(Some(4096))), Some(4096));
    }

    #[test]
    fn payload_capacity_differs_by_position() {
        assert_eq!(payload_capacity(512, 0), 500);
        assert_eq!(payload_capacity(512, 1), 504);
    }

    #[test]
    fn page_size_validation() {
        assert!(validate_page_size(512).is_ok());
        assert!(validate_page_size(63).is_err());
        assert!(validate_page_size(100).is_err());
    }

    #[test]
    fn locate_virtual_crosses_pages_at_the_right_boundary() {
        // page_size=64: first page holds 52 bytes, later pages hold 56.
        assert_eq!(locate_virtual(64, 0), (0, 0));
        assert_eq!(locate_virtual(64, 51), (0, 51));
        assert_eq!(locate_virtual(64, 52), (1, 0));
        assert_eq!(locate_virtual(64, 52 + 56), (2, 0));
    }
}
