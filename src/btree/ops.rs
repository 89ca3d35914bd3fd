//! Search, insert, and delete (§4.4): the CoW algorithms that walk a
//! [`PageNode`] tree and produce new, freshly allocated versions of every
//! page they touch.

use std::cell::RefCell;
use std::rc::Rc;

use crate::btree::page::{min_occupancy, ChildRef, Leaf, LeafEntry, Node, PageNode, ValueSlot};
use crate::btree::split;
use crate::codec::Codec;
use crate::page::Offset;
use crate::pager::{File, PageStore};
use crate::Result;

/// Above this many inline duplicate values, a Leaf's value slot is
/// promoted to a nested sub-tree (§3 "Duplicate handling"). Not specified
/// numerically by the design; chosen so a handful of duplicates stay cheap
/// to scan inline while large duplicate sets get real B+Tree lookup.
pub const DUP_INLINE_THRESHOLD: usize = 8;

/// Shared, read-only context for one insert/delete call: the backing page
/// store, the tree's codecs, its fan-out, and the revision being built.
/// `shadowed` accumulates the on-disk offsets of every page this call
/// replaces, for the caller to free or register in the CopiedPagesBtree.
pub struct Ctx<'a, F, KC, VC> {
    pub store: &'a PageStore<F>,
    pub kc: &'a KC,
    pub vc: &'a VC,
    pub fanout: usize,
    pub allow_duplicates: bool,
    pub revision: u64,
    pub shadowed: RefCell<Vec<Offset>>,
}

impl<'a, F, KC, VC> Ctx<'a, F, KC, VC> {
    pub fn new(store: &'a PageStore<F>, kc: &'a KC, vc: &'a VC, fanout: usize, allow_duplicates: bool, revision: u64) -> Self {
        Self {
            store,
            kc,
            vc,
            fanout,
            allow_duplicates,
            revision,
            shadowed: RefCell::new(Vec::new()),
        }
    }

    fn shadow(&self, offset: Option<Offset>) {
        if let Some(o) = offset {
            self.shadowed.borrow_mut().push(o);
        }
    }

    pub fn min_occupancy(&self) -> usize {
        min_occupancy(self.fanout)
    }
}

/// Outcome of searching down into a subtree for a key, per §4.4.
pub enum InsertResult<K, V> {
    /// The key was already present; the tree was left untouched (either
    /// duplicates are disallowed, or the value was already one of the
    /// stored duplicates).
    ExistingValue(V),
    /// The subtree root was replaced by a CoW copy; no split needed.
    Modified(Rc<PageNode<K, V>>),
    /// The target page overflowed; `promoted` separates `left` and `right`
    /// and must be inserted into the parent (or become a new root).
    Split(K, Rc<PageNode<K, V>>, Rc<PageNode<K, V>>),
}

/// Outcome of deleting a key from a subtree, per §4.4. `Removed` covers
/// both an ordinary CoW removal and a borrow that rebalanced a child
/// in place without changing this page's own child count; `Merged` means
/// this page lost a child (and a key) and its own occupancy must now be
/// checked by its parent.
pub enum DeleteResult<K, V> {
    NotPresent,
    Removed(Rc<PageNode<K, V>>, (K, V)),
    BorrowedFromLeft(Rc<PageNode<K, V>>, (K, V)),
    BorrowedFromRight(Rc<PageNode<K, V>>, (K, V)),
    Merged(Rc<PageNode<K, V>>, (K, V)),
}

impl<K, V> DeleteResult<K, V> {
    pub(crate) fn into_parts(self) -> Option<(Rc<PageNode<K, V>>, (K, V))> {
        match self {
            DeleteResult::NotPresent => None,
            DeleteResult::Removed(p, r) => Some((p, r)),
            DeleteResult::BorrowedFromLeft(p, r) => Some((p, r)),
            DeleteResult::BorrowedFromRight(p, r) => Some((p, r)),
            DeleteResult::Merged(p, r) => Some((p, r)),
        }
    }
}

/// Point lookup: descend to the leaf and binary-search it.
pub fn search<F, KC, VC>(
    page: &Rc<PageNode<KC::Item, VC::Item>>,
    key: &KC::Item,
    store: &PageStore<F>,
    kc: &KC,
    vc: &VC,
) -> Result<Option<VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    match page.as_ref() {
        PageNode::Leaf(leaf) => match leaf.find(key, kc)? {
            Ok(idx) => Ok(leaf.entries[idx].value.representative().cloned()),
            Err(_) => Ok(None),
        },
        PageNode::Node(node) => {
            let idx = node.child_index(key, kc)?;
            let child = node.children[idx].resolve(store, kc, vc)?;
            search(&child, key, store, kc, vc)
        }
    }
}

/// Insert `key`/`value` into the subtree rooted at `page`.
pub fn insert<F, KC, VC>(
    page: &Rc<PageNode<KC::Item, VC::Item>>,
    key: &KC::Item,
    value: &VC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<InsertResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    match page.as_ref() {
        PageNode::Leaf(leaf) => insert_leaf(leaf, key, value, ctx),
        PageNode::Node(node) => insert_node(page, node, key, value, ctx),
    }
}

fn insert_leaf<F, KC, VC>(
    leaf: &Leaf<KC::Item, VC::Item>,
    key: &KC::Item,
    value: &VC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<InsertResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    let mut new_leaf = leaf.clone();
    new_leaf.revision = ctx.revision;
    new_leaf.source_offset = None;

    match leaf.find(key, ctx.kc)? {
        Ok(idx) => {
            if !ctx.allow_duplicates {
                let existing = new_leaf.entries[idx]
                    .value
                    .representative()
                    .cloned()
                    .expect("existing slot always has a representative value");
                return Ok(InsertResult::ExistingValue(existing));
            }

            let already_present = match &new_leaf.entries[idx].value {
                ValueSlot::Single(v) => v == value,
                ValueSlot::Multi(vs) => vs.iter().any(|v| v == value),
                ValueSlot::SubTree(_) => false,
            };
            if already_present {
                return Ok(InsertResult::ExistingValue(value.clone()));
            }

            ctx.shadow(leaf.source_offset);
            match &new_leaf.entries[idx].value {
                ValueSlot::Single(existing) => {
                    let mut vs = vec![existing.clone(), value.clone()];
                    new_leaf.entries[idx].value = if vs.len() > DUP_INLINE_THRESHOLD {
                        ValueSlot::SubTree(promote_dup_subtree(vs.drain(..), ctx)?)
                    } else {
                        ValueSlot::Multi(vs)
                    };
                }
                ValueSlot::Multi(existing) => {
                    let mut vs = existing.clone();
                    vs.push(value.clone());
                    new_leaf.entries[idx].value = if vs.len() > DUP_INLINE_THRESHOLD {
                        ValueSlot::SubTree(promote_dup_subtree(vs.drain(..), ctx)?)
                    } else {
                        ValueSlot::Multi(vs)
                    };
                }
                ValueSlot::SubTree(offset) => {
                    new_leaf.entries[idx].value = ValueSlot::SubTree(insert_into_dup_subtree(*offset, value, ctx)?);
                }
            }
            finish_leaf_insert(new_leaf, ctx)
        }
        Err(insert_at) => {
            ctx.shadow(leaf.source_offset);
            new_leaf.entries.insert(
                insert_at,
                LeafEntry {
                    key: crate::btree::page::KeyHolder::encode(key.clone(), ctx.kc),
                    value: ValueSlot::Single(value.clone()),
                },
            );
            finish_leaf_insert(new_leaf, ctx)
        }
    }
}

fn finish_leaf_insert<F, KC, VC>(
    new_leaf: Leaf<KC::Item, VC::Item>,
    ctx: &Ctx<F, KC, VC>,
) -> Result<InsertResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    if new_leaf.entries.len() <= ctx.fanout {
        Ok(InsertResult::Modified(Rc::new(PageNode::Leaf(new_leaf))))
    } else {
        let (promoted, left, right) = split::split_leaf(new_leaf, ctx.revision, ctx.kc)?;
        Ok(InsertResult::Split(
            promoted,
            Rc::new(PageNode::Leaf(left)),
            Rc::new(PageNode::Leaf(right)),
        ))
    }
}

fn insert_node<F, KC, VC>(
    page: &Rc<PageNode<KC::Item, VC::Item>>,
    node: &Node<KC::Item, VC::Item>,
    key: &KC::Item,
    value: &VC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<InsertResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    let idx = node.child_index(key, ctx.kc)?;
    let child = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
    let result = insert(&child, key, value, ctx)?;

    match result {
        InsertResult::ExistingValue(v) => Ok(InsertResult::ExistingValue(v)),
        InsertResult::Modified(new_child) => {
            let _ = page;
            ctx.shadow(node.source_offset);
            let mut new_node = node.clone();
            new_node.revision = ctx.revision;
            new_node.source_offset = None;
            new_node.children[idx] = ChildRef::resolved(new_child);
            Ok(InsertResult::Modified(Rc::new(PageNode::Node(new_node))))
        }
        InsertResult::Split(promoted, left, right) => {
            ctx.shadow(node.source_offset);
            let mut new_node = node.clone();
            new_node.revision = ctx.revision;
            new_node.source_offset = None;
            new_node.children[idx] = ChildRef::resolved(left);
            new_node
                .children
                .insert(idx + 1, ChildRef::resolved(right));
            new_node
                .keys
                .insert(idx, crate::btree::page::KeyHolder::encode(promoted, ctx.kc));

            if new_node.children.len() <= ctx.fanout {
                Ok(InsertResult::Modified(Rc::new(PageNode::Node(new_node))))
            } else {
                let (promoted, left, right) = split::split_node(new_node, ctx.revision, ctx.kc)?;
                Ok(InsertResult::Split(
                    promoted,
                    Rc::new(PageNode::Node(left)),
                    Rc::new(PageNode::Node(right)),
                ))
            }
        }
    }
}

/// Delete `key` from the subtree rooted at `page`. `is_root` suppresses
/// underflow handling: a root Leaf or Node is allowed to fall below the
/// usual minimum occupancy (§4.4).
pub fn delete<F, KC, VC>(
    page: &Rc<PageNode<KC::Item, VC::Item>>,
    key: &KC::Item,
    is_root: bool,
    ctx: &Ctx<F, KC, VC>,
) -> Result<DeleteResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    match page.as_ref() {
        PageNode::Leaf(leaf) => delete_leaf(leaf, key, ctx),
        PageNode::Node(node) => delete_node(node, key, is_root, ctx),
    }
}

fn delete_leaf<F, KC, VC>(
    leaf: &Leaf<KC::Item, VC::Item>,
    key: &KC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<DeleteResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    match leaf.find(key, ctx.kc)? {
        Err(_) => Ok(DeleteResult::NotPresent),
        Ok(idx) => {
            ctx.shadow(leaf.source_offset);
            let mut new_leaf = leaf.clone();
            new_leaf.revision = ctx.revision;
            new_leaf.source_offset = None;
            let removed_entry = new_leaf.entries.remove(idx);
            let removed_key = removed_entry.key.get(ctx.kc)?.clone();
            let removed_value = match &removed_entry.value {
                ValueSlot::SubTree(offset) => collect_dup_values(*offset, ctx.store, ctx.vc)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| crate::Error::InvalidBTree("duplicate sub-tree has no values".into()))?,
                _ => removed_entry
                    .value
                    .representative()
                    .cloned()
                    .expect("removed slot always has a representative value"),
            };
            Ok(DeleteResult::Removed(
                Rc::new(PageNode::Leaf(new_leaf)),
                (removed_key, removed_value),
            ))
        }
    }
}

fn delete_node<F, KC, VC>(
    node: &Node<KC::Item, VC::Item>,
    key: &KC::Item,
    is_root: bool,
    ctx: &Ctx<F, KC, VC>,
) -> Result<DeleteResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    let idx = node.child_index(key, ctx.kc)?;
    let child = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
    let result = delete(&child, key, false, ctx)?;

    let (new_child, removed) = match result.into_parts() {
        None => return Ok(DeleteResult::NotPresent),
        Some(parts) => parts,
    };

    let min = ctx.min_occupancy();
    let underflowed = new_child.occupancy() < min;

    ctx.shadow(node.source_offset);
    let mut new_node = node.clone();
    new_node.revision = ctx.revision;
    new_node.source_offset = None;
    new_node.children[idx] = ChildRef::resolved(new_child.clone());

    if idx > 0 {
        let smallest = new_child.smallest_key(ctx.store, ctx.kc, ctx.vc)?;
        new_node.keys[idx - 1] = crate::btree::page::KeyHolder::encode(smallest, ctx.kc);
    }

    if !underflowed {
        return Ok(DeleteResult::Removed(Rc::new(PageNode::Node(new_node)), removed));
    }

    rebalance_child(new_node, idx, ctx, removed)
}

fn rebalance_child<F, KC, VC>(
    mut node: Node<KC::Item, VC::Item>,
    idx: usize,
    ctx: &Ctx<F, KC, VC>,
    removed: (KC::Item, VC::Item),
) -> Result<DeleteResult<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    let min = ctx.min_occupancy();
    let has_right = idx + 1 < node.children.len();
    let has_left = idx > 0;

    if has_right {
        let right = node.children[idx + 1].resolve(ctx.store, ctx.kc, ctx.vc)?;
        if right.occupancy() > min {
            ctx.shadow(right.source_offset());
            let new_sep = rotate_from_right(&mut node, idx, &right, ctx)?;
            node.keys[idx] = crate::btree::page::KeyHolder::encode(new_sep, ctx.kc);
            return Ok(DeleteResult::BorrowedFromRight(Rc::new(PageNode::Node(node)), removed));
        }
    }
    if has_left {
        let left = node.children[idx - 1].resolve(ctx.store, ctx.kc, ctx.vc)?;
        if left.occupancy() > min {
            ctx.shadow(left.source_offset());
            let new_sep = rotate_from_left(&mut node, idx, &left, ctx)?;
            node.keys[idx - 1] = crate::btree::page::KeyHolder::encode(new_sep, ctx.kc);
            return Ok(DeleteResult::BorrowedFromLeft(Rc::new(PageNode::Node(node)), removed));
        }
    }

    if has_right {
        let right = node.children[idx + 1].resolve(ctx.store, ctx.kc, ctx.vc)?;
        ctx.shadow(right.source_offset());
        let target = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
        let separator = node.keys[idx].get(ctx.kc)?.clone();
        let merged = merge_pages(&target, &right, separator, ctx)?;
        node.children[idx] = ChildRef::resolved(Rc::new(merged));
        node.children.remove(idx + 1);
        node.keys.remove(idx);
    } else if has_left {
        let left = node.children[idx - 1].resolve(ctx.store, ctx.kc, ctx.vc)?;
        ctx.shadow(left.source_offset());
        let target = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
        let separator = node.keys[idx - 1].get(ctx.kc)?.clone();
        let merged = merge_pages(&left, &target, separator, ctx)?;
        node.children[idx - 1] = ChildRef::resolved(Rc::new(merged));
        node.children.remove(idx);
        node.keys.remove(idx - 1);
    } else {
        // Only child: nothing to borrow from or merge with. Leave as-is;
        // the root-shrink case at the top level handles a lone surviving
        // child when this node is itself the root.
        return Ok(DeleteResult::Removed(Rc::new(PageNode::Node(node)), removed));
    }

    Ok(DeleteResult::Merged(Rc::new(PageNode::Node(node)), removed))
}

fn rotate_from_right<F, KC, VC>(
    node: &mut Node<KC::Item, VC::Item>,
    idx: usize,
    right: &Rc<PageNode<KC::Item, VC::Item>>,
    ctx: &Ctx<F, KC, VC>,
) -> Result<KC::Item>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    let target = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
    let old_separator = node.keys[idx].get(ctx.kc)?.clone();

    match (target.as_ref(), right.as_ref()) {
        (PageNode::Leaf(_), PageNode::Leaf(_)) => {
            let mut left_leaf = target.as_leaf().unwrap().clone();
            let mut right_leaf = right.as_leaf().unwrap().clone();
            let new_sep = split::borrow_leaf_from_right(&mut left_leaf, &mut right_leaf, ctx.revision, ctx.kc)?;
            node.children[idx] = ChildRef::resolved(Rc::new(PageNode::Leaf(left_leaf)));
            node.children[idx + 1] = ChildRef::resolved(Rc::new(PageNode::Leaf(right_leaf)));
            Ok(new_sep)
        }
        (PageNode::Node(_), PageNode::Node(_)) => {
            let mut left_node = target.as_node().unwrap().clone();
            let mut right_node = right.as_node().unwrap().clone();
            let new_sep =
                split::borrow_node_from_right(&mut left_node, &mut right_node, old_separator, ctx.revision, ctx.kc)?;
            node.children[idx] = ChildRef::resolved(Rc::new(PageNode::Node(left_node)));
            node.children[idx + 1] = ChildRef::resolved(Rc::new(PageNode::Node(right_node)));
            Ok(new_sep)
        }
        _ => Err(crate::Error::InvalidBTree("sibling height mismatch".into())),
    }
}

fn rotate_from_left<F, KC, VC>(
    node: &mut Node<KC::Item, VC::Item>,
    idx: usize,
    left: &Rc<PageNode<KC::Item, VC::Item>>,
    ctx: &Ctx<F, KC, VC>,
) -> Result<KC::Item>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    let target = node.children[idx].resolve(ctx.store, ctx.kc, ctx.vc)?;
    let old_separator = node.keys[idx - 1].get(ctx.kc)?.clone();

    match (left.as_ref(), target.as_ref()) {
        (PageNode::Leaf(_), PageNode::Leaf(_)) => {
            let mut left_leaf = left.as_leaf().unwrap().clone();
            let mut right_leaf = target.as_leaf().unwrap().clone();
            let new_sep = split::borrow_leaf_from_left(&mut left_leaf, &mut right_leaf, ctx.revision, ctx.kc)?;
            node.children[idx - 1] = ChildRef::resolved(Rc::new(PageNode::Leaf(left_leaf)));
            node.children[idx] = ChildRef::resolved(Rc::new(PageNode::Leaf(right_leaf)));
            Ok(new_sep)
        }
        (PageNode::Node(_), PageNode::Node(_)) => {
            let mut left_node = left.as_node().unwrap().clone();
            let mut right_node = target.as_node().unwrap().clone();
            let new_sep =
                split::borrow_node_from_left(&mut left_node, &mut right_node, old_separator, ctx.revision, ctx.kc)?;
            node.children[idx - 1] = ChildRef::resolved(Rc::new(PageNode::Node(left_node)));
            node.children[idx] = ChildRef::resolved(Rc::new(PageNode::Node(right_node)));
            Ok(new_sep)
        }
        _ => Err(crate::Error::InvalidBTree("sibling height mismatch".into())),
    }
}

fn merge_pages<F, KC, VC>(
    left: &Rc<PageNode<KC::Item, VC::Item>>,
    right: &Rc<PageNode<KC::Item, VC::Item>>,
    separator: KC::Item,
    ctx: &Ctx<F, KC, VC>,
) -> Result<PageNode<KC::Item, VC::Item>>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone,
{
    match (left.as_ref(), right.as_ref()) {
        (PageNode::Leaf(l), PageNode::Leaf(r)) => {
            Ok(PageNode::Leaf(split::merge_leaves(l.clone(), r.clone(), ctx.revision)))
        }
        (PageNode::Node(l), PageNode::Node(r)) => Ok(PageNode::Node(split::merge_nodes(
            l.clone(),
            r.clone(),
            separator,
            ctx.revision,
            ctx.kc,
        ))),
        _ => Err(crate::Error::InvalidBTree("sibling height mismatch".into())),
    }
}

/// Build a fresh duplicate-values sub-tree out of `values`: its own keys
/// are the duplicate values, its own values are `()` (§3 "Duplicate
/// handling"). Used the moment a Leaf slot's inline duplicate count
/// crosses [`DUP_INLINE_THRESHOLD`].
fn promote_dup_subtree<F, KC, VC>(values: impl Iterator<Item = VC::Item>, ctx: &Ctx<F, KC, VC>) -> Result<Offset>
where
    F: File,
    KC: Codec,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    let unit = crate::codec::UnitCodec;
    let sub_ctx = Ctx::new(ctx.store, ctx.vc, &unit, ctx.fanout, false, ctx.revision);
    let mut root = crate::btree::empty_root::<VC::Item, ()>(ctx.revision);
    for v in values {
        match crate::btree::insert_root(&root, &v, &(), &sub_ctx)? {
            crate::btree::RootInsert::Existing(_) => {}
            crate::btree::RootInsert::New(new_root) => root = new_root,
        }
    }
    let (offset, _) = crate::btree::flush_page(ctx.store, ctx.vc, &unit, root)?;
    Ok(offset)
}

/// Add one more value to an already-promoted duplicate sub-tree rooted
/// at `offset`, returning the new root offset (a no-op, same offset
/// back, if the value is already one of the stored duplicates).
fn insert_into_dup_subtree<F, KC, VC>(offset: Offset, value: &VC::Item, ctx: &Ctx<F, KC, VC>) -> Result<Offset>
where
    F: File,
    KC: Codec,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    let unit = crate::codec::UnitCodec;
    let root = crate::btree::fetch_page(ctx.store, offset, ctx.vc, &unit)?;
    let sub_ctx = Ctx::new(ctx.store, ctx.vc, &unit, ctx.fanout, false, ctx.revision);
    let new_root = match crate::btree::insert_root(&root, value, &(), &sub_ctx)? {
        crate::btree::RootInsert::Existing(_) => return Ok(offset),
        crate::btree::RootInsert::New(r) => r,
    };
    let (new_offset, _) = crate::btree::flush_page(ctx.store, ctx.vc, &unit, new_root)?;
    Ok(new_offset)
}

/// Collect every value stored in a duplicate sub-tree, in order, for the
/// cursor façade to flatten back into `(key, value)` pairs.
pub(crate) fn collect_dup_values<F, VC>(offset: Offset, store: &PageStore<F>, vc: &VC) -> Result<Vec<VC::Item>>
where
    F: File,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    let unit = crate::codec::UnitCodec;
    let root = crate::btree::fetch_page(store, offset, vc, &unit)?;
    let mut out = Vec::new();
    collect_dup_values_rec(&root, store, vc, &unit, &mut out)?;
    Ok(out)
}

fn collect_dup_values_rec<F, VC>(
    page: &Rc<PageNode<VC::Item, ()>>,
    store: &PageStore<F>,
    vc: &VC,
    unit: &crate::codec::UnitCodec,
    out: &mut Vec<VC::Item>,
) -> Result<()>
where
    F: File,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    match page.as_ref() {
        PageNode::Leaf(leaf) => {
            for entry in &leaf.entries {
                out.push(entry.key.get(vc)?.clone());
            }
            Ok(())
        }
        PageNode::Node(node) => {
            for child in &node.children {
                let child_page = child.resolve(store, vc, unit)?;
                collect_dup_values_rec(&child_page, store, vc, unit, out)?;
            }
            Ok(())
        }
    }
}
