use super::test_support::MemoryFile;
use super::*;

#[test]
fn allocate_extends_file_then_reuses_free_list() {
    let store = PageStore::create(MemoryFile::default(), 512).unwrap();

    let a = store.allocate().unwrap();
    let b = store.allocate().unwrap();
    assert_eq!(a.offset(), 512);
    assert_eq!(b.offset(), 1024);

    store.push_free(a.offset()).unwrap();
    store.push_free(b.offset()).unwrap();

    // LIFO: b was freed last, so it comes back first.
    let reused = store.allocate().unwrap();
    assert_eq!(reused.offset(), b.offset());
    let reused2 = store.allocate().unwrap();
    assert_eq!(reused2.offset(), a.offset());

    // Free list is now empty; the next allocation extends the file again.
    let fresh = store.allocate().unwrap();
    assert_eq!(fresh.offset(), 1536);
}

#[test]
fn fetch_after_flush_round_trips_bytes() {
    let store = PageStore::create(MemoryFile::default(), 512).unwrap();
    let mut page = store.allocate().unwrap();
    page.payload_mut(0).fill(0xAB);
    store.flush(&[page.clone()]).unwrap();

    let read_back = store.fetch(page.offset()).unwrap();
    assert_eq!(read_back.payload(0), page.payload(0));
}

#[test]
fn fetch_rejects_misaligned_or_out_of_range_offsets() {
    let store = PageStore::create(MemoryFile::default(), 512).unwrap();
    store.allocate().unwrap();

    assert!(store.fetch(10).is_err());
    assert!(store.fetch(512 * 100).is_err());
}

#[test]
fn read_chain_follows_links_across_pages() {
    let store = PageStore::create(MemoryFile::default(), 64).unwrap();

    let mut first = store.allocate().unwrap();
    let mut second = store.allocate().unwrap();

    first.set_next_page_offset(Some(second.offset()));
    first.set_logical_size(100);
    second.set_next_page_offset(None);

    store.flush(&[first.clone(), second.clone()]).unwrap();

    let chain = store.read_chain(first.offset(), 100).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].offset(), first.offset());
    assert_eq!(chain[1].offset(), second.offset());
}

#[test]
fn reopen_preserves_previously_flushed_pages() {
    let file = MemoryFile::default();
    let store = PageStore::create(file.clone(), 512).unwrap();
    let mut page = store.allocate().unwrap();
    page.payload_mut(0)[..5].copy_from_slice(b"hello");
    store.flush(&[page.clone()]).unwrap();
    let page_count = store.page_count();
    drop(store);

    let reopened = PageStore::open(file, 512, None).unwrap();
    assert_eq!(reopened.page_count(), page_count);
    let read_back = reopened.fetch(page.offset()).unwrap();
    assert_eq!(&read_back.payload(0)[..5], b"hello");
}

