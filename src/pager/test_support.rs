//! In-memory [`File`] implementation shared by unit tests across the crate,
//! grounded in the same mock-over-a-shared-buffer pattern used for
//! pager-level tests: no real disk I/O, but real offset/short-read
//! semantics.

use std::cmp;
use std::sync::{Arc, Mutex};

use super::File;
use crate::{Error, Result};

#[derive(Clone, Default)]
pub struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl File for MemoryFile {
    fn len(&self) -> Result<u64> {
        Ok(self.data.lock().unwrap().len() as u64)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = self.data.lock().unwrap();
        let offset = offset as usize;

        if offset >= data.len() {
            return Err(Error::EndOfFile);
        }

        let available = data.len() - offset;
        let to_read = cmp::min(available, buf.len());
        if to_read < buf.len() {
            return Err(Error::EndOfFile);
        }

        buf.copy_from_slice(&data[offset..offset + to_read]);
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let offset = offset as usize;

        if offset + buf.len() > data.len() {
            data.resize(offset + buf.len(), 0);
        }

        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync_data(&self) -> Result<()> {
        Ok(())
    }
}
