//! A bounded read cache for recently fetched pages, keyed by physical
//! offset. Eviction order is least-recently-used; wrapping the `lru` crate
//! here mirrors how the rest of the pager layer leans on small, focused
//! crates instead of hand-rolling cache bookkeeping.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;

use crate::page::Offset;

pub struct PageCache {
    inner: LruCache<Offset, Bytes>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, offset: Offset) -> Option<Bytes> {
        self.inner.get(&offset).cloned()
    }

    pub fn insert(&mut self, offset: Offset, buf: Bytes) {
        self.inner.put(offset, buf);
    }

    /// Drop a cached entry because the page was freed or shadowed; stale
    /// bytes must never be served for an offset that can be recycled.
    pub fn invalidate(&mut self, offset: Offset) {
        self.inner.pop(&offset);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut cache = PageCache::new(2);
        cache.insert(0, Bytes::from_static(b"a"));
        cache.insert(512, Bytes::from_static(b"b"));
        assert_eq!(cache.get(0), Some(Bytes::from_static(b"a")));
        assert_eq!(cache.get(512), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let mut cache = PageCache::new(1);
        cache.insert(0, Bytes::from_static(b"a"));
        cache.insert(512, Bytes::from_static(b"b"));
        assert_eq!(cache.get(0), None);
        assert_eq!(cache.get(512), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn invalidate_removes_entry() {
        let mut cache = PageCache::new(2);
        cache.insert(0, Bytes::from_static(b"a"));
        cache.invalidate(0);
        assert_eq!(cache.get(0), None);
    }
}
