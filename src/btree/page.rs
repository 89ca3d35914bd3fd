//! The B+Tree page model (§4.3): [`Leaf`] and [`Node`] pages, lazily
//! deserialised key holders, lazily resolved child references, and the
//! three-variant leaf value slot that backs duplicate-key support.

use std::rc::Rc;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::codec::Codec;
use crate::page::Offset;
use crate::pager::{File, PageStore};
use crate::record::{RecordReader, RecordWriter};
use crate::{Error, Result};

/// Minimum occupancy for a non-root Node or Leaf under a given fan-out,
/// per §4.4: `⌈m/2⌉`.
pub fn min_occupancy(fanout: usize) -> usize {
    fanout.div_ceil(2)
}

/// A key as stored in a page: the raw encoded bytes plus a memoized decode.
/// Binary search over a page's keys only decodes the `O(log n)` entries it
/// actually compares against, leaving the rest as bytes until something else
/// needs them.
#[derive(Debug, Clone)]
pub struct KeyHolder<K> {
    raw: Bytes,
    cached: OnceLock<K>,
}

impl<K: Clone> KeyHolder<K> {
    pub fn from_raw(raw: Bytes) -> Self {
        Self {
            raw,
            cached: OnceLock::new(),
        }
    }

    pub fn from_decoded(raw: Bytes, value: K) -> Self {
        let cached = OnceLock::new();
        let _ = cached.set(value);
        Self { raw, cached }
    }

    /// Build a holder from an in-memory decoded value, encoding it eagerly
    /// since this path is only used when this process just produced the
    /// value (promoted separators, freshly inserted keys).
    pub fn encode<C: Codec<Item = K>>(value: K, codec: &C) -> Self {
        let raw = Bytes::from(codec.encode(&value));
        Self::from_decoded(raw, value)
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn get<C: Codec<Item = K>>(&self, codec: &C) -> Result<&K> {
        if let Some(v) = self.cached.get() {
            return Ok(v);
        }
        let decoded = codec.decode(&self.raw)?;
        Ok(self.cached.get_or_init(|| decoded))
    }
}

/// A Leaf's value slot: an inline single value, an inline array of
/// duplicate values under the inline threshold, or an offset to a nested
/// B+Tree holding a larger duplicate set (§3 "Duplicate handling").
#[derive(Debug, Clone)]
pub enum ValueSlot<V> {
    Single(V),
    Multi(Vec<V>),
    SubTree(Offset),
}

impl<V: Clone> ValueSlot<V> {
    /// A representative value for APIs that only need one, e.g. the
    /// `(key, value)` pair handed back from `delete`.
    pub fn representative(&self) -> Option<&V> {
        match self {
            ValueSlot::Single(v) => Some(v),
            ValueSlot::Multi(vs) => vs.first(),
            ValueSlot::SubTree(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeafEntry<K, V> {
    pub key: KeyHolder<K>,
    pub value: ValueSlot<V>,
}

/// A Leaf page: entries sorted by key, each carrying one value slot.
/// `source_offset` is `Some` when this page was materialised from disk and
/// has not yet been touched by the current transaction; a CoW replacement
/// always builds a fresh `Leaf` with `source_offset: None`.
#[derive(Debug, Clone)]
pub struct Leaf<K, V> {
    pub revision: u64,
    pub source_offset: Option<Offset>,
    pub entries: Vec<LeafEntry<K, V>>,
}

impl<K: Ord + Clone, V: Clone> Leaf<K, V> {
    pub fn empty(revision: u64) -> Self {
        Self {
            revision,
            source_offset: None,
            entries: Vec::new(),
        }
    }

    /// Binary search by decoded key, touching only the keys actually
    /// compared against.
    pub fn find<C: Codec<Item = K>>(&self, key: &K, codec: &C) -> Result<std::result::Result<usize, usize>> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_key = self.entries[mid].key.get(codec)?;
            match mid_key.cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }
}

/// A lazily resolved reference to a child page of a [`Node`]. Resolution
/// fetches the child's page chain and deserialises it on first use, then
/// memoizes the result for the holder's lifetime (§4.3 "Child holder").
#[derive(Debug)]
pub struct ChildRef<K, V> {
    offset: Offset,
    last_offset: Offset,
    resolved: OnceLock<Rc<PageNode<K, V>>>,
}

impl<K, V> Clone for ChildRef<K, V> {
    fn clone(&self) -> Self {
        let resolved = OnceLock::new();
        if let Some(p) = self.resolved.get() {
            let _ = resolved.set(p.clone());
        }
        Self {
            offset: self.offset,
            last_offset: self.last_offset,
            resolved,
        }
    }
}

impl<K, V> ChildRef<K, V> {
    pub fn unresolved(offset: Offset, last_offset: Offset) -> Self {
        Self {
            offset,
            last_offset,
            resolved: OnceLock::new(),
        }
    }

    /// Wrap a page that already lives in memory this transaction (never
    /// written to disk, so there is no offset to resolve lazily).
    pub fn resolved(page: Rc<PageNode<K, V>>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(page);
        Self {
            offset: Offset::MAX,
            last_offset: Offset::MAX,
            resolved: cell,
        }
    }

    /// Wrap a page that has just been flushed to `offset`/`last_offset`,
    /// keeping the in-memory copy cached so a parent that was itself
    /// rebuilt during the same flush pass doesn't need to re-fetch a
    /// child it already holds (§4.5 commit: new pages are written
    /// bottom-up before the parent that references them).
    pub fn resolved_at(offset: Offset, last_offset: Offset, page: Rc<PageNode<K, V>>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(page);
        Self {
            offset,
            last_offset,
            resolved: cell,
        }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn last_offset(&self) -> Offset {
        self.last_offset
    }

    pub fn is_in_memory(&self) -> bool {
        self.offset == Offset::MAX
    }
}

impl<K: Ord + Clone, V: Clone> ChildRef<K, V> {
    pub fn resolve<F, KC, VC>(&self, store: &PageStore<F>, kc: &KC, vc: &VC) -> Result<Rc<PageNode<K, V>>>
    where
        F: File,
        KC: Codec<Item = K>,
        VC: Codec<Item = V>,
    {
        if let Some(p) = self.resolved.get() {
            return Ok(p.clone());
        }
        let head = store.fetch(self.offset)?;
        let chain = store.read_chain(self.offset, head.logical_size() as usize)?;
        let mut reader = RecordReader::new(chain);
        let page = Rc::new(deserialize_page(&mut reader, Some(self.offset), kc, vc)?);
        Ok(self.resolved.get_or_init(|| page).clone())
    }
}

/// A Node page: `keys.len() + 1 == children.len()`, `keys[i]` is the
/// smallest key reachable through `children[i + 1]`.
#[derive(Debug, Clone)]
pub struct Node<K, V> {
    pub revision: u64,
    pub source_offset: Option<Offset>,
    pub keys: Vec<KeyHolder<K>>,
    pub children: Vec<ChildRef<K, V>>,
}

impl<K: Ord + Clone, V: Clone> Node<K, V> {
    /// Index of the child to descend into for `key`: the last child whose
    /// separator key is `<= key`.
    pub fn child_index<C: Codec<Item = K>>(&self, key: &K, codec: &C) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_key = self.keys[mid].get(codec)?;
            if mid_key <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

/// A page is either a Leaf or an internal Node; the negated child count on
/// disk (§3) is what lets a reader tell them apart without extra metadata.
#[derive(Debug, Clone)]
pub enum PageNode<K, V> {
    Leaf(Leaf<K, V>),
    Node(Node<K, V>),
}

impl<K: Ord + Clone, V: Clone> PageNode<K, V> {
    pub fn revision(&self) -> u64 {
        match self {
            PageNode::Leaf(l) => l.revision,
            PageNode::Node(n) => n.revision,
        }
    }

    pub fn source_offset(&self) -> Option<Offset> {
        match self {
            PageNode::Leaf(l) => l.source_offset,
            PageNode::Node(n) => n.source_offset,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf<K, V>> {
        match self {
            PageNode::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node<K, V>> {
        match self {
            PageNode::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Occupancy used for the min-occupancy rebalancing check: entry count
    /// for a Leaf, child count for a Node.
    pub fn occupancy(&self) -> usize {
        match self {
            PageNode::Leaf(l) => l.entries.len(),
            PageNode::Node(n) => n.children.len(),
        }
    }

    /// Descend to the leftmost leaf to find the smallest key reachable from
    /// this page, used to refresh a separator key after the key it mirrored
    /// was deleted (§4.4 "edge cases").
    pub fn smallest_key<F, KC, VC>(&self, store: &PageStore<F>, kc: &KC, vc: &VC) -> Result<K>
    where
        F: File,
        KC: Codec<Item = K>,
        VC: Codec<Item = V>,
    {
        match self {
            PageNode::Leaf(l) => l
                .entries
                .first()
                .ok_or_else(|| Error::InvalidBTree("leaf has no entries".into()))?
                .key
                .get(kc)
                .cloned(),
            PageNode::Node(n) => {
                let first = n
                    .children
                    .first()
                    .ok_or_else(|| Error::InvalidBTree("node has no children".into()))?;
                let child = first.resolve(store, kc, vc)?;
                child.smallest_key(store, kc, vc)
            }
        }
    }
}

/// Serialize a page's payload into a brand-new page chain allocated from
/// `store`, returning the finished chain (not yet flushed) and its head
/// offset.
pub fn serialize_page<F, KC, VC>(
    page: &PageNode<KC::Item, VC::Item>,
    store: &PageStore<F>,
    kc: &KC,
    vc: &VC,
) -> Result<(Offset, Vec<crate::page::PageIo>)>
where
    F: File,
    KC: Codec,
    VC: Codec,
{
    let first = store.allocate()?;
    let mut writer = RecordWriter::new(store, first);
    let offset = writer.offset();

    match page {
        PageNode::Leaf(leaf) => {
            writer.write_u64(leaf.revision)?;
            writer.write_i32(leaf.entries.len() as i32)?;
            let body = encode_leaf_body(leaf, kc, vc)?;
            writer.write_u32(body.len() as u32)?;
            writer.write_bytes(&body)?;
        }
        PageNode::Node(node) => {
            writer.write_u64(node.revision)?;
            writer.write_i32(-(node.children.len() as i32))?;
            let body = encode_node_body(node, kc);
            writer.write_u32(body.len() as u32)?;
            writer.write_bytes(&body)?;
        }
    }

    Ok((offset, writer.finish()))
}

fn encode_leaf_body<K, V, KC, VC>(leaf: &Leaf<K, V>, kc: &KC, vc: &VC) -> Result<Vec<u8>>
where
    KC: Codec<Item = K>,
    VC: Codec<Item = V>,
{
    let mut out = Vec::new();
    for entry in &leaf.entries {
        match &entry.value {
            ValueSlot::Single(v) => {
                out.extend_from_slice(&1i32.to_be_bytes());
                let bytes = vc.encode(v);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(&bytes);
            }
            ValueSlot::Multi(vs) => {
                out.extend_from_slice(&(vs.len() as i32).to_be_bytes());
                for v in vs {
                    let bytes = vc.encode(v);
                    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
            }
            ValueSlot::SubTree(offset) => {
                // Encoded as -(count+1); the subtree's own element count is
                // not tracked here, so 0 is used as a placeholder count.
                let tag = -(0i32 + 1);
                out.extend_from_slice(&tag.to_be_bytes());
                out.extend_from_slice(&(*offset as i64).to_be_bytes());
            }
        }
        let key_bytes = kc.encode(entry.key.get(kc)?);
        out.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&key_bytes);
    }
    Ok(out)
}

fn encode_node_body<K, V, KC>(node: &Node<K, V>, kc: &KC) -> Vec<u8>
where
    KC: Codec<Item = K>,
{
    let mut out = Vec::new();
    for i in 0..node.keys.len() {
        let child = &node.children[i];
        out.extend_from_slice(&(child.offset() as i64).to_be_bytes());
        out.extend_from_slice(&(child.last_offset() as i64).to_be_bytes());
        let key_bytes = kc.encode(node.keys[i].get(kc).expect("key already decoded before encode"));
        out.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&key_bytes);
    }
    let last = node.children.last().expect("a node always has at least one child");
    out.extend_from_slice(&(last.offset() as i64).to_be_bytes());
    out.extend_from_slice(&(last.last_offset() as i64).to_be_bytes());
    out
}

/// Deserialize a page from an already-read chain. `source_offset` records
/// where it came from, so later CoW replacement knows which offset to
/// shadow.
pub fn deserialize_page<K, V, KC, VC>(
    reader: &mut RecordReader,
    source_offset: Option<Offset>,
    kc: &KC,
    vc: &VC,
) -> Result<PageNode<K, V>>
where
    K: Ord + Clone,
    V: Clone,
    KC: Codec<Item = K>,
    VC: Codec<Item = V>,
{
    let revision = reader.read_u64()?;
    let count = reader.read_i32()?;
    let _data_size = reader.read_u32()?;

    if count >= 0 {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let n_values = reader.read_i32()?;
            let value = if n_values >= 0 {
                if n_values == 1 {
                    let bytes = reader.read_blob()?;
                    ValueSlot::Single(vc.decode(&bytes)?)
                } else {
                    let mut vs = Vec::with_capacity(n_values as usize);
                    for _ in 0..n_values {
                        let bytes = reader.read_blob()?;
                        vs.push(vc.decode(&bytes)?);
                    }
                    ValueSlot::Multi(vs)
                }
            } else {
                let _count = (-n_values - 1) as usize;
                let offset = reader.read_i64()? as Offset;
                ValueSlot::SubTree(offset)
            };
            let key_bytes = reader.read_blob()?;
            let key = KeyHolder::from_raw(Bytes::from(key_bytes));
            entries.push(LeafEntry { key, value });
        }
        Ok(PageNode::Leaf(Leaf {
            revision,
            source_offset,
            entries,
        }))
    } else {
        let n_children = (-count) as usize;
        let mut keys = Vec::with_capacity(n_children.saturating_sub(1));
        let mut children = Vec::with_capacity(n_children);
        for _ in 0..n_children.saturating_sub(1) {
            let child_offset = reader.read_i64()? as Offset;
            let child_last = reader.read_i64()? as Offset;
            let key_bytes = reader.read_blob()?;
            children.push(ChildRef::unresolved(child_offset, child_last));
            keys.push(KeyHolder::from_raw(Bytes::from(key_bytes)));
        }
        let last_offset = reader.read_i64()? as Offset;
        let last_last = reader.read_i64()? as Offset;
        children.push(ChildRef::unresolved(last_offset, last_last));
        Ok(PageNode::Node(Node {
            revision,
            source_offset,
            keys,
            children,
        }))
    }
}
