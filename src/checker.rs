//! The integrity checker (§4.6): walks every page reachable from the
//! global header — the free list, the two internal trees, and every
//! managed tree's `BTreeInfo`/`BTreeHeader` records and data pages —
//! marking each physical page into a bitmap-like set and reporting any
//! page visited twice or left unaccounted for.
//!
//! The checker never decodes keys or values: a Node's child offsets sit
//! at fixed positions in its raw body (§3), so reachability can be
//! verified without the tree's codecs.

use std::collections::HashSet;

use crate::page::Offset;
use crate::pager::{File, PageStore};
use crate::Result;

/// One violation of an invariant from §3/§4.6: an offset that is
/// misaligned, out of range, reachable from more than one owner, or a
/// chain that ends before its declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub offset: Offset,
    pub reason: String,
}

/// The result of a full-file walk (§8 property 5, S5).
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub total_pages: u64,
    pub free_pages: u64,
    pub live_pages: u64,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The three record chains rooted at a single managed tree (or either
/// internal tree): its immutable `BTreeInfo`, its current `BTreeHeader`,
/// and the B+Tree data pages that header's `rootPageOffset` names.
#[derive(Debug, Clone, Copy)]
pub struct TreeOffsets {
    pub info_offset: Offset,
    pub header_offset: Offset,
    pub root_offset: Offset,
}

/// Walk the whole file starting from the global header's free list and
/// every tree's offsets, and report what it finds.
pub fn check<F: File>(store: &PageStore<F>, first_free_page: Option<Offset>, trees: &[TreeOffsets]) -> Result<IntegrityReport> {
    let page_size = store.page_size() as usize;
    let total_pages = store.page_count();
    let mut seen: HashSet<Offset> = HashSet::new();
    let mut violations = Vec::new();

    // Page 0 is the global header: a fixed page, never part of a chain.
    seen.insert(0);

    let mut free_pages = 0u64;
    let mut next = first_free_page;
    while let Some(offset) = next {
        if offset % page_size as u64 != 0 {
            violations.push(IntegrityViolation {
                offset,
                reason: "free-list link is not page-aligned".into(),
            });
            break;
        }
        if !seen.insert(offset) {
            violations.push(IntegrityViolation {
                offset,
                reason: "free list revisits a page (cycle)".into(),
            });
            break;
        }
        free_pages += 1;
        let page = store.fetch(offset)?;
        next = page.next_page_offset();
    }

    for t in trees {
        mark_record_chain(store, t.info_offset, &mut seen, &mut violations)?;
        mark_record_chain(store, t.header_offset, &mut seen, &mut violations)?;
        walk_tree_chain(store, t.root_offset, page_size, &mut seen, &mut violations)?;
    }

    let live_pages = seen.len() as u64 - 1 - free_pages;

    if 1 + free_pages + live_pages != total_pages {
        violations.push(IntegrityViolation {
            offset: 0,
            reason: format!(
                "page accounting mismatch: 1 header + {free_pages} free + {live_pages} live != {total_pages} total"
            ),
        });
    }

    Ok(IntegrityReport {
        total_pages,
        free_pages,
        live_pages,
        violations,
    })
}

/// Mark every physical page of a chain holding a non-tree record
/// (`BTreeInfo`/`BTreeHeader`) without interpreting its body.
fn mark_record_chain<F: File>(
    store: &PageStore<F>,
    head: Offset,
    seen: &mut HashSet<Offset>,
    violations: &mut Vec<IntegrityViolation>,
) -> Result<()> {
    let page_size = store.page_size() as usize;
    let mut offset = Some(head);
    let mut index = 0usize;
    let mut collected = 0usize;
    let mut logical_size = 0usize;

    while let Some(o) = offset {
        if o % page_size as u64 != 0 {
            violations.push(IntegrityViolation {
                offset: o,
                reason: "offset is not page-aligned".into(),
            });
            return Ok(());
        }
        if !seen.insert(o) {
            violations.push(IntegrityViolation {
                offset: o,
                reason: "page reachable from more than one owner".into(),
            });
            return Ok(());
        }
        let page = store.fetch(o)?;
        if index == 0 {
            logical_size = page.logical_size() as usize;
        }
        collected += crate::page::payload_capacity(page_size, index);
        offset = page.next_page_offset();
        index += 1;
        if collected >= logical_size {
            break;
        }
    }

    if collected < logical_size {
        violations.push(IntegrityViolation {
            offset: head,
            reason: "chain ended before logicalSize bytes were reachable".into(),
        });
    }
    Ok(())
}

/// Mark a B+Tree data page chain, recursing into a Node's children by
/// reading their raw offsets out of the body (§3's Node payload layout)
/// without decoding any key.
fn walk_tree_chain<F: File>(
    store: &PageStore<F>,
    head: Offset,
    page_size: usize,
    seen: &mut HashSet<Offset>,
    violations: &mut Vec<IntegrityViolation>,
) -> Result<()> {
    let mut offset = Some(head);
    let mut index = 0usize;
    let mut payload = Vec::new();
    let mut logical_size = 0usize;

    while let Some(o) = offset {
        if o % page_size as u64 != 0 {
            violations.push(IntegrityViolation {
                offset: o,
                reason: "offset is not page-aligned".into(),
            });
            return Ok(());
        }
        if !seen.insert(o) {
            violations.push(IntegrityViolation {
                offset: o,
                reason: "page reachable from more than one owner".into(),
            });
            return Ok(());
        }
        let page = store.fetch(o)?;
        if index == 0 {
            logical_size = page.logical_size() as usize;
        }
        payload.extend_from_slice(page.payload(index));
        offset = page.next_page_offset();
        index += 1;
        if payload.len() >= logical_size {
            break;
        }
    }

    if payload.len() < logical_size {
        violations.push(IntegrityViolation {
            offset: head,
            reason: "chain ended before logicalSize bytes were reachable".into(),
        });
        return Ok(());
    }
    payload.truncate(logical_size);

    if payload.len() < 16 {
        violations.push(IntegrityViolation {
            offset: head,
            reason: "page body shorter than the fixed revision/count/dataSize header".into(),
        });
        return Ok(());
    }
    let count = i32::from_be_bytes(payload[8..12].try_into().unwrap());
    if count >= 0 {
        return Ok(()); // Leaf: no children to recurse into.
    }

    let n_children = (-count) as usize;
    let mut pos = 16usize;
    for i in 0..n_children {
        if pos + 16 > payload.len() {
            violations.push(IntegrityViolation {
                offset: head,
                reason: "node body truncated before its declared child count".into(),
            });
            return Ok(());
        }
        let child_offset = u64::from_be_bytes(payload[pos..pos + 8].try_into().unwrap());
        pos += 16;
        if i + 1 < n_children {
            if pos + 4 > payload.len() {
                violations.push(IntegrityViolation {
                    offset: head,
                    reason: "node body truncated before a separator key length".into(),
                });
                return Ok(());
            }
            let key_len = u32::from_be_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4 + key_len;
        }
        walk_tree_chain(store, child_offset, page_size, seen, violations)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree;
    use crate::btree::page::{KeyHolder, Leaf, LeafEntry, PageNode, ValueSlot};
    use crate::codec::U64Codec;
    use crate::pager::test_support::MemoryFile;
    use std::rc::Rc;

    fn store() -> PageStore<MemoryFile> {
        PageStore::create(MemoryFile::default(), 512).unwrap()
    }

    #[test]
    fn empty_file_reports_only_the_header() {
        let store = store();
        let report = check(&store, None, &[]).unwrap();
        assert_eq!(report.total_pages, 1);
        assert_eq!(report.live_pages, 0);
        assert_eq!(report.free_pages, 0);
        assert!(report.is_ok());
    }

    #[test]
    fn single_leaf_tree_is_accounted_for() {
        let store = store();
        let kc = U64Codec;
        let vc = U64Codec;
        let mut leaf: Leaf<u64, u64> = Leaf::empty(0);
        leaf.entries.push(LeafEntry {
            key: KeyHolder::encode(10u64, &kc),
            value: ValueSlot::Single(1u64),
        });
        let page = Rc::new(PageNode::Leaf(leaf));
        let (root_offset, _) = btree::flush_page(&store, &kc, &vc, page).unwrap();

        let header_offset = btree::write_record(&store, |w| {
            w.write_u64(0)?;
            w.write_u64(1)?;
            w.write_u64(root_offset)?;
            w.write_u64(0)
        })
        .unwrap();
        let info_offset = btree::write_record(&store, |w| w.write_blob(b"t")).unwrap();

        let trees = [TreeOffsets {
            info_offset,
            header_offset,
            root_offset,
        }];
        let report = check(&store, store.first_free_page(), &trees).unwrap();
        assert!(report.is_ok(), "{:?}", report.violations);
        assert_eq!(report.live_pages, 3);
    }
}
