//! The B+Tree page model and algorithms (§4.3–4.4), plus the glue that
//! ties a root-level insert/delete outcome to the serialization layer:
//! growing or shrinking the root, and flushing every freshly CoW-copied
//! page bottom-up so a parent only ever references children by their
//! real on-disk offset.

pub mod ops;
pub mod page;
pub mod split;

use std::rc::Rc;

use crate::btree::page::{ChildRef, KeyHolder, Leaf, Node, PageNode};
use crate::codec::Codec;
use crate::page::Offset;
use crate::pager::{File, PageStore};
use crate::record::{RecordReader, RecordWriter};
use crate::Result;

pub use ops::{Ctx, DeleteResult, InsertResult};

/// A fresh, empty Leaf at `revision` — what a brand-new managed tree's
/// root starts out as (§4.5 "manage(tree)").
pub fn empty_root<K, V>(revision: u64) -> Rc<PageNode<K, V>>
where
    K: Ord + Clone,
    V: Clone,
{
    Rc::new(PageNode::Leaf(Leaf::empty(revision)))
}

/// Fetch and deserialize the page chain at `offset` into an in-memory
/// page. Used to materialize a tree's root (or, via [`page::ChildRef`],
/// any lazily-resolved child) from disk.
pub fn fetch_page<F, KC, VC>(
    store: &PageStore<F>,
    offset: Offset,
    kc: &KC,
    vc: &VC,
) -> Result<Rc<PageNode<KC::Item, VC::Item>>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    let head = store.fetch(offset)?;
    let chain = store.read_chain(offset, head.logical_size() as usize)?;
    let mut reader = RecordReader::new(chain);
    let page = page::deserialize_page(&mut reader, Some(offset), kc, vc)?;
    Ok(Rc::new(page))
}

/// Outcome of an insert against a tree's root: either the key was
/// already present (no new root), or insertion produced a new root,
/// possibly one level taller.
pub enum RootInsert<K, V> {
    Existing(V),
    New(Rc<PageNode<K, V>>),
}

/// Apply [`ops::insert`] at the root, handling the one case only a root
/// caller can: a `Split` result means the tree grows a level, with a
/// freshly built Node over the two halves.
pub fn insert_root<F, KC, VC>(
    root: &Rc<PageNode<KC::Item, VC::Item>>,
    key: &KC::Item,
    value: &VC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<RootInsert<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    match ops::insert(root, key, value, ctx)? {
        InsertResult::ExistingValue(v) => Ok(RootInsert::Existing(v)),
        InsertResult::Modified(new_root) => Ok(RootInsert::New(new_root)),
        InsertResult::Split(promoted, left, right) => {
            let new_root = Node {
                revision: ctx.revision,
                source_offset: None,
                keys: vec![KeyHolder::encode(promoted, ctx.kc)],
                children: vec![ChildRef::resolved(left), ChildRef::resolved(right)],
            };
            Ok(RootInsert::New(Rc::new(PageNode::Node(new_root))))
        }
    }
}

/// Outcome of a delete against a tree's root.
pub enum RootDelete<K, V> {
    NotPresent,
    Removed(Rc<PageNode<K, V>>, (K, V)),
}

/// Apply [`ops::delete`] at the root, handling root-shrink: when the
/// root is a Node that lost its last key, the single surviving child
/// becomes the new root (§4.4 "edge cases").
pub fn delete_root<F, KC, VC>(
    root: &Rc<PageNode<KC::Item, VC::Item>>,
    key: &KC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<RootDelete<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    let result = ops::delete(root, key, true, ctx)?;
    let Some((mut new_root, removed)) = result.into_parts() else {
        return Ok(RootDelete::NotPresent);
    };

    if let PageNode::Node(node) = new_root.as_ref() {
        if node.keys.is_empty() {
            new_root = node.children[0].resolve(ctx.store, ctx.kc, ctx.vc)?;
        }
    }

    Ok(RootDelete::Removed(new_root, removed))
}

/// Recursively flush a freshly CoW-built page (and any in-memory
/// descendant it references) to the page store, bottom-up, so every
/// Node body on disk only ever names children by their real offset
/// (§4.4 "CoW discipline": every `Modified/Split/.../Merged` result's
/// pages are written before the parent commits).
///
/// Returns the flushed page's `(offset, lastOffset)` for the caller (or
/// an ancestor) to link to.
pub fn flush_page<F, KC, VC>(
    store: &PageStore<F>,
    kc: &KC,
    vc: &VC,
    page: Rc<PageNode<KC::Item, VC::Item>>,
) -> Result<(Offset, Offset)>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    let to_write = if let PageNode::Node(node) = page.as_ref() {
        let mut rebuilt_children = Vec::with_capacity(node.children.len());
        let mut changed = false;
        for child in &node.children {
            if child.is_in_memory() {
                changed = true;
                let inner = child.resolve(store, kc, vc)?;
                let (offset, last_offset) = flush_page(store, kc, vc, inner.clone())?;
                rebuilt_children.push(ChildRef::resolved_at(offset, last_offset, inner));
            } else {
                rebuilt_children.push(child.clone());
            }
        }
        if changed {
            let mut new_node = node.clone();
            new_node.children = rebuilt_children;
            Rc::new(PageNode::Node(new_node))
        } else {
            page
        }
    } else {
        page
    };

    let (offset, pages) = page::serialize_page(&to_write, store, kc, vc)?;
    store.flush(&pages)?;
    let last_offset = pages.last().expect("a record chain always has a head page").offset();
    Ok((offset, last_offset))
}

/// Write a brand-new logical record of arbitrary typed fields (used for
/// `BTreeInfo`/`BTreeHeader` records, which don't follow the Leaf/Node
/// page layout) and flush it, returning the head offset.
pub fn write_record<'s, F: File>(
    store: &'s PageStore<F>,
    body: impl FnOnce(&mut RecordWriter<'s, F>) -> Result<()>,
) -> Result<Offset> {
    let first = store.allocate()?;
    let mut writer = RecordWriter::new(store, first);
    let offset = writer.offset();
    body(&mut writer)?;
    let pages = writer.finish();
    store.flush(&pages)?;
    Ok(offset)
}

/// Read a logical record back into a [`RecordReader`] positioned at its
/// start, given the head offset and the number of payload bytes it was
/// written with.
pub fn read_record<F: File>(store: &PageStore<F>, offset: Offset) -> Result<RecordReader> {
    let head = store.fetch(offset)?;
    let chain = store.read_chain(offset, head.logical_size() as usize)?;
    Ok(RecordReader::new(chain))
}
