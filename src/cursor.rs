//! The iterator/cursor façade (§1 "external collaborator ... consumes
//! the page reader interface defined here"): a lazy, ordered `(key,
//! value)` sequence over a single immutable B+Tree revision, driven by
//! an explicit parent stack rather than sibling pointers (the page
//! model carries none).

use std::rc::Rc;

use crate::btree::ops;
use crate::btree::page::{PageNode, ValueSlot};
use crate::codec::Codec;
use crate::pager::{File, PageStore};
use crate::Result;

/// One still-open Node frame on the descent stack: the node itself and
/// the index of the next child still to be visited.
struct Frame<K, V> {
    node: Rc<PageNode<K, V>>,
    next_child: usize,
}

/// Ordered cursor over a tree's `(key, value)` pairs, optionally bounded
/// to `[start, end]` (§6 `tree.browse()`, supplemented `Cursor::range`).
/// Duplicate values — whether inline or in a promoted sub-tree — are
/// flattened into repeated `(key, value)` pairs, one per stored value.
pub struct Cursor<'a, F, KC, VC>
where
    KC: Codec,
    VC: Codec,
{
    store: &'a PageStore<F>,
    kc: &'a KC,
    vc: &'a VC,
    stack: Vec<Frame<KC::Item, VC::Item>>,
    leaf: Option<Rc<PageNode<KC::Item, VC::Item>>>,
    leaf_pos: usize,
    pending: std::collections::VecDeque<(KC::Item, VC::Item)>,
    end: Option<KC::Item>,
    done: bool,
}

impl<'a, F, KC, VC> Cursor<'a, F, KC, VC>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    /// An unbounded cursor over every entry in `root`, left to right.
    pub(crate) fn new(store: &'a PageStore<F>, kc: &'a KC, vc: &'a VC, root: Rc<PageNode<KC::Item, VC::Item>>) -> Result<Self> {
        let mut cursor = Self {
            store,
            kc,
            vc,
            stack: Vec::new(),
            leaf: None,
            leaf_pos: 0,
            pending: std::collections::VecDeque::new(),
            end: None,
            done: false,
        };
        cursor.descend_leftmost(root)?;
        Ok(cursor)
    }

    /// A cursor bounded to keys in `[start, end]`, descending directly to
    /// the leaf that would hold `start` instead of the tree's leftmost leaf.
    pub(crate) fn new_range(
        store: &'a PageStore<F>,
        kc: &'a KC,
        vc: &'a VC,
        root: Rc<PageNode<KC::Item, VC::Item>>,
        start: KC::Item,
        end: KC::Item,
    ) -> Result<Self> {
        let mut cursor = Self {
            store,
            kc,
            vc,
            stack: Vec::new(),
            leaf: None,
            leaf_pos: 0,
            pending: std::collections::VecDeque::new(),
            end: Some(end),
            done: false,
        };
        cursor.descend_to_key(root, &start)?;
        Ok(cursor)
    }

    fn descend_leftmost(&mut self, mut page: Rc<PageNode<KC::Item, VC::Item>>) -> Result<()> {
        loop {
            match page.as_ref() {
                PageNode::Leaf(_) => {
                    self.leaf = Some(page);
                    self.leaf_pos = 0;
                    return Ok(());
                }
                PageNode::Node(node) => {
                    let child = node.children[0].resolve(self.store, self.kc, self.vc)?;
                    self.stack.push(Frame {
                        node: page.clone(),
                        next_child: 1,
                    });
                    page = child;
                }
            }
        }
    }

    fn descend_to_key(&mut self, mut page: Rc<PageNode<KC::Item, VC::Item>>, key: &KC::Item) -> Result<()> {
        loop {
            match page.as_ref() {
                PageNode::Leaf(leaf) => {
                    let pos = match leaf.find(key, self.kc)? {
                        Ok(idx) => idx,
                        Err(idx) => idx,
                    };
                    self.leaf = Some(page);
                    self.leaf_pos = pos;
                    return Ok(());
                }
                PageNode::Node(node) => {
                    let idx = node.child_index(key, self.kc)?;
                    let child = node.children[idx].resolve(self.store, self.kc, self.vc)?;
                    self.stack.push(Frame {
                        node: page.clone(),
                        next_child: idx + 1,
                    });
                    page = child;
                }
            }
        }
    }

    /// Pop frames until one still has an unvisited child, then descend
    /// that child's left spine to the next leaf. Returns `false` when the
    /// traversal is exhausted.
    fn advance_to_next_leaf(&mut self) -> Result<bool> {
        while let Some(frame) = self.stack.pop() {
            let node = frame.node.as_node().expect("frame always wraps a Node page");
            if frame.next_child < node.children.len() {
                let child = node.children[frame.next_child].resolve(self.store, self.kc, self.vc)?;
                self.stack.push(Frame {
                    node: frame.node,
                    next_child: frame.next_child + 1,
                });
                self.descend_leftmost(child)?;
                return Ok(true);
            }
        }
        self.leaf = None;
        Ok(false)
    }
}

impl<'a, F, KC, VC> Iterator for Cursor<'a, F, KC, VC>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Ord + Clone,
{
    type Item = Result<(KC::Item, VC::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.pending.pop_front() {
                return Some(Ok(pair));
            }
            if self.done {
                return None;
            }

            let leaf_page = self.leaf.clone()?;
            let leaf = leaf_page.as_leaf().expect("cursor leaf slot always wraps a Leaf page");

            if self.leaf_pos >= leaf.entries.len() {
                match self.advance_to_next_leaf() {
                    Ok(true) => continue,
                    Ok(false) => return None,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let entry = &leaf.entries[self.leaf_pos];
            self.leaf_pos += 1;

            let key = match entry.key.get(self.kc) {
                Ok(k) => k.clone(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if let Some(end) = &self.end {
                if &key > end {
                    self.done = true;
                    self.leaf = None;
                    return None;
                }
            }

            match &entry.value {
                ValueSlot::Single(v) => return Some(Ok((key, v.clone()))),
                ValueSlot::Multi(vs) => {
                    for v in vs {
                        self.pending.push_back((key.clone(), v.clone()));
                    }
                }
                ValueSlot::SubTree(offset) => match ops::collect_dup_values(*offset, self.store, self.vc) {
                    Ok(vals) => {
                        for v in vals {
                            self.pending.push_back((key.clone(), v));
                        }
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}
