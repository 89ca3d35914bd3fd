//! `RecordManager` (§4.5): owns the file, the global header, the two
//! internal bookkeeping trees (Btree-of-Btrees, CopiedPagesBtree), and the
//! reentrant writer transaction that every mutating call runs inside.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;

use crate::btree::ops::Ctx;
use crate::btree::page::PageNode;
use crate::checker::{self, IntegrityReport, TreeOffsets};
use crate::codec::{BincodeCodec, Codec, U64Codec};
use crate::cursor::Cursor;
use crate::page::{self, Offset, PageIo};
use crate::pager::{File, PageStore};
use crate::{Error, Result};

/// Size in bytes of the global header record (§3): `pageSize(4) +
/// managedTreeCount(4) + firstFreePage(8) + currentBobOffset(8) +
/// previousBobOffset(8) + currentCpbOffset(8) + previousCpbOffset(8)`.
const HEADER_LEN: usize = 48;

/// The Btree-of-Btrees' key: `(treeName, revision)`, ordered by name then
/// revision so every revision of a tree sorts contiguously.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
struct BobKey {
    name: String,
    revision: u64,
}

/// The CopiedPagesBtree's key: `(revision, treeName)`, per §3/GLOSSARY.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
struct CpbKey {
    revision: u64,
    name: String,
}

type BobCodec = BincodeCodec<BobKey>;
type CpbKeyCodec = BincodeCodec<CpbKey>;
type CpbValueCodec = BincodeCodec<Vec<u64>>;

fn bob_codecs() -> (BobCodec, U64Codec) {
    (BincodeCodec::new(), U64Codec)
}

fn cpb_codecs() -> (CpbKeyCodec, CpbValueCodec) {
    (BincodeCodec::new(), BincodeCodec::new())
}

/// The global header, one fixed-size record at offset 0, rewritten in
/// place (twice per commit, §4.5 "two-phase header write").
#[derive(Debug, Clone)]
struct Header {
    page_size: u32,
    managed_tree_count: u32,
    first_free_page: Option<Offset>,
    current_bob_offset: Offset,
    previous_bob_offset: Option<Offset>,
    current_cpb_offset: Offset,
    previous_cpb_offset: Option<Offset>,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.page_size.to_be_bytes());
        buf[4..8].copy_from_slice(&self.managed_tree_count.to_be_bytes());
        buf[8..16].copy_from_slice(&page::encode_offset(self.first_free_page).to_be_bytes());
        buf[16..24].copy_from_slice(&(self.current_bob_offset as i64).to_be_bytes());
        buf[24..32].copy_from_slice(&page::encode_offset(self.previous_bob_offset).to_be_bytes());
        buf[32..40].copy_from_slice(&(self.current_cpb_offset as i64).to_be_bytes());
        buf[40..48].copy_from_slice(&page::encode_offset(self.previous_cpb_offset).to_be_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::InvalidBTree("global header shorter than 48 bytes".into()));
        }
        let page_size = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let managed_tree_count = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let first_free_page = page::decode_offset(i64::from_be_bytes(buf[8..16].try_into().unwrap()));
        let current_bob_offset = i64::from_be_bytes(buf[16..24].try_into().unwrap()) as Offset;
        let previous_bob_offset = page::decode_offset(i64::from_be_bytes(buf[24..32].try_into().unwrap()));
        let current_cpb_offset = i64::from_be_bytes(buf[32..40].try_into().unwrap()) as Offset;
        let previous_cpb_offset = page::decode_offset(i64::from_be_bytes(buf[40..48].try_into().unwrap()));
        Ok(Self {
            page_size,
            managed_tree_count,
            first_free_page,
            current_bob_offset,
            previous_bob_offset,
            current_cpb_offset,
            previous_cpb_offset,
        })
    }
}

fn write_header<F: File>(store: &PageStore<F>, header: &Header) -> Result<()> {
    let mut page = PageIo::zeroed(0, store.page_size() as usize);
    page.buf_mut()[..HEADER_LEN].copy_from_slice(&header.encode());
    store.flush(std::slice::from_ref(&page))
}

/// Per-tree bookkeeping `RecordManager` needs without knowing the tree's
/// concrete key/value types: everything a `BTreeHandle` needs to locate
/// and describe its tree lives here; the codecs themselves are supplied
/// fresh by the caller on every `tree()` call (§9 "cyclic ownership
/// between a tree and its pages" is sidestepped by never caching a
/// decoded page across calls — only offsets and counters are retained).
#[derive(Debug, Clone)]
struct TreeMeta {
    info_offset: Offset,
    header_offset: Offset,
    root_offset: Offset,
    revision: u64,
    element_count: u64,
    fanout: usize,
    allow_duplicates: bool,
    key_codec_name: String,
    value_codec_name: String,
}

/// State that exists only while a transaction is open, built up by every
/// mutating call made under it and discarded on `rollback` or merged into
/// the committed state on `commit` (§4.5 "per-transaction allocated/freed
/// page lists").
struct Txn {
    revision: u64,
    dirty_trees: HashMap<String, TreeMeta>,
    bob_root: Rc<PageNode<BobKey, u64>>,
    cpb_root: Rc<PageNode<CpbKey, Vec<u64>>>,
    freed_pages: Vec<Offset>,
    prev_bob_offset: Offset,
    prev_cpb_offset: Offset,
    /// Set the moment any op actually mutates something under this
    /// transaction. A pure no-op (insert of an already-present key,
    /// delete of an absent one) never flips this, so `commit()` can skip
    /// re-flushing the internal trees and rewriting the header entirely
    /// (§8 property 7: a no-op must leave header offsets unchanged).
    dirty: bool,
}

/// A reentrant mutual-exclusion primitive for the single writer (§4.5,
/// §9 "implement with a mutex + an owner-thread field + depth counter").
/// Readers never take this lock; only `begin`/`commit`/`rollback` do.
struct WriterLock {
    state: Mutex<LockState>,
    released: Condvar,
}

struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

impl WriterLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState { owner: None, depth: 0 }),
            released: Condvar::new(),
        }
    }

    /// Acquire (or reenter) the lock for the calling thread. Blocks until
    /// any other thread's transaction completes.
    fn acquire(&self) -> usize {
        let me = std::thread::current().id();
        let mut state = self.state.lock().unwrap();
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return state.depth;
                }
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return 1;
                }
                Some(_) => {
                    state = self.released.wait(state).unwrap();
                }
            }
        }
    }

    /// Decrement the reentrancy depth, releasing the lock entirely once
    /// it reaches zero. Returns the depth after decrementing.
    fn release(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.depth = state.depth.saturating_sub(1);
        let depth = state.depth;
        if depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        depth
    }
}

/// Owns one file and every B+Tree persisted in it (§4.5). `RecordManager`
/// methods take `&self`: the writer lock, not `&mut`, is what serialises
/// mutation, matching how [`PageStore`] itself is built around interior
/// mutability so readers and the single writer can share one handle.
pub struct RecordManager<F> {
    store: PageStore<F>,
    lock: WriterLock,
    header: Mutex<Header>,
    trees: Mutex<HashMap<String, TreeMeta>>,
    keep_revisions: Mutex<bool>,
    next_revision: Mutex<u64>,
    txn: Mutex<Option<Txn>>,
    /// The Btree-of-Btrees' and CopiedPagesBtree's own `BTreeInfo` offsets.
    /// Written once at `create()` time and never rewritten afterward (only
    /// their `BTreeHeader` record changes, every commit), so these are
    /// plain immutable instance state rather than something read off the
    /// current header on every commit.
    bob_info_offset: Offset,
    cpb_info_offset: Offset,
}

impl<F: File> RecordManager<F> {
    /// Initialize a brand-new file: a zeroed header, both internal trees
    /// created empty, their BTreeInfo/BTreeHeader records written, their
    /// offsets persisted into the header (§4.5 "Init").
    pub fn create(file: F, page_size: u32) -> Result<Self> {
        let store = PageStore::create(file, page_size)?;

        let (bob_kc, bob_vc) = bob_codecs();
        let (cpb_kc, cpb_vc) = cpb_codecs();

        let bob_info = write_tree_info(&store, "__bob", bob_kc.name(), bob_vc.name(), false, 32)?;
        let bob_root = crate::btree::empty_root::<BobKey, u64>(0);
        let (bob_root_offset, _) = crate::btree::flush_page(&store, &bob_kc, &bob_vc, bob_root)?;
        let bob_header = write_tree_header(&store, 0, 0, bob_root_offset, bob_info)?;

        let cpb_info = write_tree_info(&store, "__cpb", cpb_kc.name(), cpb_vc.name(), false, 32)?;
        let cpb_root = crate::btree::empty_root::<CpbKey, Vec<u64>>(0);
        let (cpb_root_offset, _) = crate::btree::flush_page(&store, &cpb_kc, &cpb_vc, cpb_root)?;
        let cpb_header = write_tree_header(&store, 0, 0, cpb_root_offset, cpb_info)?;

        let header = Header {
            page_size,
            managed_tree_count: 0,
            first_free_page: store.first_free_page(),
            current_bob_offset: bob_header,
            previous_bob_offset: None,
            current_cpb_offset: cpb_header,
            previous_cpb_offset: None,
        };
        write_header(&store, &header)?;

        Ok(Self {
            store,
            lock: WriterLock::new(),
            header: Mutex::new(header),
            trees: Mutex::new(HashMap::new()),
            keep_revisions: Mutex::new(false),
            next_revision: Mutex::new(1),
            txn: Mutex::new(None),
            bob_info_offset: bob_info,
            cpb_info_offset: cpb_info,
        })
    }

    /// Reopen an existing file: read the header, then walk the
    /// Btree-of-Btrees keeping, per name, the entry with the highest
    /// revision (§4.5 "Load").
    pub fn open(file: F) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN];
        file.read_exact_at(&mut raw, 0)?;
        let header = Header::decode(&raw)?;
        let store = PageStore::open(file, header.page_size, header.first_free_page)?;

        let bob_info_offset = tree_info_offset(&store, header.current_bob_offset)?;
        let cpb_info_offset = tree_info_offset(&store, header.current_cpb_offset)?;

        let (bob_kc, bob_vc) = bob_codecs();
        let bob_root = crate::btree::fetch_page(&store, tree_root_offset(&store, header.current_bob_offset)?, &bob_kc, &bob_vc)?;

        let mut trees = HashMap::new();
        let mut max_revision = 0u64;
        for item in Cursor::new(&store, &bob_kc, &bob_vc, bob_root)? {
            let (key, header_offset) = item?;
            max_revision = max_revision.max(key.revision);
            let entry = trees.entry(key.name.clone());
            let replace = match &entry {
                std::collections::hash_map::Entry::Occupied(o) => o.get().revision < key.revision,
                std::collections::hash_map::Entry::Vacant(_) => true,
            };
            if replace {
                let meta = read_tree_meta(&store, header_offset)?;
                trees.insert(key.name, meta);
            }
        }

        Ok(Self {
            store,
            lock: WriterLock::new(),
            header: Mutex::new(header),
            trees: Mutex::new(trees),
            keep_revisions: Mutex::new(false),
            next_revision: Mutex::new(max_revision + 1),
            txn: Mutex::new(None),
            bob_info_offset,
            cpb_info_offset,
        })
    }

    /// §6 `rm.setKeepRevisions(bool)`.
    pub fn set_keep_revisions(&self, keep: bool) {
        *self.keep_revisions.lock().unwrap() = keep;
    }

    fn keeps_revisions(&self) -> bool {
        *self.keep_revisions.lock().unwrap()
    }
}

/// Filename used when `open_path` is pointed at a directory rather than a
/// file (§6 "uses default name if `path` is a directory").
pub const DEFAULT_FILE_NAME: &str = "btreefile.db";

impl RecordManager<std::fs::File> {
    /// §6 `open(path, pageSize?) → RecordManager`: the on-disk convenience
    /// entry point, layered over [`RecordManager::create`]/[`RecordManager::open`].
    /// Creates the file (and any default filename under a directory `path`)
    /// on first open; reopens it as-is otherwise. `page_size` is ignored
    /// when reopening an existing file, whose header is authoritative.
    pub fn open_path(path: impl AsRef<std::path::Path>, page_size: Option<u32>) -> Result<Self> {
        let path = path.as_ref();
        let target = if path.is_dir() {
            path.join(DEFAULT_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        let is_new = !target.exists() || target.metadata()?.len() == 0;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&target)?;

        if is_new {
            Self::create(file, page_size.unwrap_or(512))
        } else {
            Self::open(file)
        }
    }
}

impl<F: File> RecordManager<F> {
    /// Enumerate every managed tree's name (supplemented: needed to make
    /// `Load` observable from outside the crate).
    pub fn tree_names(&self) -> Vec<String> {
        self.trees.lock().unwrap().keys().cloned().collect()
    }

    /// Register a new managed tree (§4.5 "manage(tree)"). `fanout` is the
    /// tree's maximum children per Node / entries per Leaf.
    pub fn add_tree<KC, VC>(&self, name: &str, kc: KC, vc: VC, allow_duplicates: bool, fanout: usize) -> Result<BTreeHandle<'_, F, KC, VC>>
    where
        KC: Codec,
        KC::Item: Ord + Clone,
        VC: Codec,
        VC::Item: Clone + Ord,
    {
        if self.trees.lock().unwrap().contains_key(name) {
            return Err(Error::BTreeAlreadyManaged(name.to_string()));
        }

        self.begin()?;
        let result = (|| -> Result<TreeMeta> {
            let revision = self.txn.lock().unwrap().as_ref().expect("begin() always opens a transaction").revision;

            let info_offset = write_tree_info(&self.store, name, kc.name(), vc.name(), allow_duplicates, fanout)?;
            let root = crate::btree::empty_root::<KC::Item, VC::Item>(revision);
            let (root_offset, _) = crate::btree::flush_page(&self.store, &kc, &vc, root)?;
            let header_offset = write_tree_header(&self.store, revision, 0, root_offset, info_offset)?;

            let mut txn_guard = self.txn.lock().unwrap();
            let txn = txn_guard.as_mut().expect("begin() always opens a transaction");
            let (bob_kc, bob_vc) = bob_codecs();
            let bob_ctx = Ctx::new(&self.store, &bob_kc, &bob_vc, 32, false, txn.revision);
            let key = BobKey {
                name: name.to_string(),
                revision,
            };
            if let crate::btree::RootInsert::New(new_bob) = crate::btree::insert_root(&txn.bob_root, &key, &header_offset, &bob_ctx)? {
                txn.bob_root = new_bob;
            }

            Ok(TreeMeta {
                info_offset,
                header_offset,
                root_offset,
                revision,
                element_count: 0,
                fanout,
                allow_duplicates,
                key_codec_name: kc.name().to_string(),
                value_codec_name: vc.name().to_string(),
            })
        })();

        match result {
            Ok(meta) => {
                {
                    let mut txn_guard = self.txn.lock().unwrap();
                    let txn = txn_guard.as_mut().unwrap();
                    txn.dirty_trees.insert(name.to_string(), meta);
                    txn.dirty = true;
                }
                self.commit()?;
                Ok(BTreeHandle {
                    manager: self,
                    name: name.to_string(),
                    kc,
                    vc,
                })
            }
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    /// Open a handle onto an already-managed tree, given the same codecs
    /// it was created with.
    pub fn tree<KC, VC>(&self, name: &str, kc: KC, vc: VC) -> Result<BTreeHandle<'_, F, KC, VC>>
    where
        KC: Codec,
        VC: Codec,
    {
        if !self.trees.lock().unwrap().contains_key(name) {
            return Err(Error::BTreeNotManaged(name.to_string()));
        }
        Ok(BTreeHandle {
            manager: self,
            name: name.to_string(),
            kc,
            vc,
        })
    }

    /// Acquire (or reenter) the writer lock and, on first entry, open a
    /// fresh [`Txn`] snapshot of both internal trees (§4.5 "begin() takes
    /// the lock, increments depth").
    fn begin(&self) -> Result<()> {
        let depth = self.lock.acquire();
        if depth == 1 {
            self.store.begin_recording();
            let header = self.header.lock().unwrap().clone();
            let (bob_kc, bob_vc) = bob_codecs();
            let (cpb_kc, cpb_vc) = cpb_codecs();
            let bob_root_offset = tree_root_offset(&self.store, header.current_bob_offset)?;
            let cpb_root_offset = tree_root_offset(&self.store, header.current_cpb_offset)?;
            let bob_root = crate::btree::fetch_page(&self.store, bob_root_offset, &bob_kc, &bob_vc)?;
            let cpb_root = crate::btree::fetch_page(&self.store, cpb_root_offset, &cpb_kc, &cpb_vc)?;
            let revision = *self.next_revision.lock().unwrap();
            *self.txn.lock().unwrap() = Some(Txn {
                revision,
                dirty_trees: HashMap::new(),
                bob_root,
                cpb_root,
                freed_pages: Vec::new(),
                prev_bob_offset: header.current_bob_offset,
                prev_cpb_offset: header.current_cpb_offset,
                dirty: false,
            });
        }
        Ok(())
    }

    /// Decrement the reentrant depth; on the outermost call, persist
    /// everything the transaction built (§4.5 "commit()").
    fn commit(&self) -> Result<()> {
        let depth_before = {
            let state = self.lock.state.lock().unwrap();
            state.depth
        };
        if depth_before > 1 {
            self.lock.release();
            return Ok(());
        }

        let txn = self.txn.lock().unwrap().take().expect("commit without a matching begin");
        let result = if txn.dirty { self.persist_commit(txn) } else { Ok(()) };
        self.store.take_recorded();
        self.lock.release();
        result
    }

    fn persist_commit(&self, txn: Txn) -> Result<()> {
        let (bob_kc, bob_vc) = bob_codecs();
        let (cpb_kc, cpb_vc) = cpb_codecs();

        // `flush_page` returns the offset of the flushed root *page*, not a
        // BTreeHeader record; wrap each one in a fresh BTreeHeader (as every
        // managed-tree commit already does via `write_tree_header`) before
        // storing it where `tree_root_offset`/`tree_info_offset` expect to
        // decode a header, not a raw node.
        let (bob_root_offset, _) = crate::btree::flush_page(&self.store, &bob_kc, &bob_vc, txn.bob_root)?;
        let (cpb_root_offset, _) = crate::btree::flush_page(&self.store, &cpb_kc, &cpb_vc, txn.cpb_root)?;
        let bob_header_offset = write_tree_header(&self.store, txn.revision, 0, bob_root_offset, self.bob_info_offset)?;
        let cpb_header_offset = write_tree_header(&self.store, txn.revision, 0, cpb_root_offset, self.cpb_info_offset)?;

        let mut trees = self.trees.lock().unwrap();
        for (name, meta) in &txn.dirty_trees {
            trees.insert(name.clone(), meta.clone());
        }
        let managed_tree_count = trees.len() as u32;
        drop(trees);

        // The superseded bob/cpb BTreeHeader records are shadowed by this
        // commit exactly like any other retired page.
        let mut freed_pages = txn.freed_pages;
        freed_pages.push(txn.prev_bob_offset);
        freed_pages.push(txn.prev_cpb_offset);

        // Phase 1: new roots, old roots preserved as `previous*`.
        let phase1 = Header {
            page_size: self.store.page_size(),
            managed_tree_count,
            first_free_page: self.store.first_free_page(),
            current_bob_offset: bob_header_offset,
            previous_bob_offset: Some(txn.prev_bob_offset),
            current_cpb_offset: cpb_header_offset,
            previous_cpb_offset: Some(txn.prev_cpb_offset),
        };
        write_header(&self.store, &phase1)?;

        for offset in &freed_pages {
            self.store.push_free(*offset)?;
        }

        // Phase 2: previous offsets retired now that the free-list append
        // is itself durable.
        let phase2 = Header {
            first_free_page: self.store.first_free_page(),
            previous_bob_offset: None,
            previous_cpb_offset: None,
            ..phase1
        };
        write_header(&self.store, &phase2)?;

        *self.header.lock().unwrap() = phase2;
        *self.next_revision.lock().unwrap() = txn.revision + 1;
        Ok(())
    }

    /// Decrement the reentrant depth; on the outermost call, return every
    /// page allocated during the transaction to the free list and discard
    /// its in-memory state (§4.5 "Rollback").
    fn rollback(&self) -> Result<()> {
        let depth_before = {
            let state = self.lock.state.lock().unwrap();
            state.depth
        };
        if depth_before > 1 {
            self.lock.release();
            return Ok(());
        }

        *self.txn.lock().unwrap() = None;
        for offset in self.store.take_recorded() {
            self.store.push_free(offset)?;
        }
        self.lock.release();
        Ok(())
    }

    /// Explicit transaction boundary for callers that want several
    /// `tree.insert`/`tree.delete` calls to land in one commit (§6
    /// `rm.commit()`; the reentrant lock is what makes the auto-wrapped
    /// begin/commit inside each op collapse into this outer one).
    pub fn begin_transaction(&self) -> Result<()> {
        self.begin()
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.commit()
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.rollback()
    }

    /// Release a retained revision's shadowed pages back to the free list
    /// (§E.6 "a small addition ... required for the CopiedPagesBtree to
    /// ever shrink").
    pub fn forget_revision(&self, tree_name: &str, revision: u64) -> Result<()> {
        self.begin()?;
        let result = (|| -> Result<()> {
            let (cpb_kc, cpb_vc) = cpb_codecs();
            let key = CpbKey {
                revision,
                name: tree_name.to_string(),
            };
            let mut txn_guard = self.txn.lock().unwrap();
            let txn = txn_guard.as_mut().unwrap();
            let ctx = Ctx::new(&self.store, &cpb_kc, &cpb_vc, 32, false, txn.revision);
            let offsets = crate::btree::ops::search(&txn.cpb_root, &key, &self.store, &cpb_kc, &cpb_vc)?;
            if let Some(offsets) = offsets {
                if let crate::btree::RootDelete::Removed(new_root, _) = crate::btree::delete_root(&txn.cpb_root, &key, &ctx)? {
                    txn.cpb_root = new_root;
                }
                txn.freed_pages.extend(offsets);
                txn.dirty = true;
            }
            Ok(())
        })();
        match result {
            Ok(()) => self.commit(),
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    /// Walk the whole file and report any integrity violation (§4.6).
    pub fn check(&self) -> Result<IntegrityReport> {
        let header = self.header.lock().unwrap().clone();
        let mut offsets = Vec::new();
        offsets.push(TreeOffsets {
            info_offset: tree_info_offset(&self.store, header.current_bob_offset)?,
            header_offset: header.current_bob_offset,
            root_offset: tree_root_offset(&self.store, header.current_bob_offset)?,
        });
        offsets.push(TreeOffsets {
            info_offset: tree_info_offset(&self.store, header.current_cpb_offset)?,
            header_offset: header.current_cpb_offset,
            root_offset: tree_root_offset(&self.store, header.current_cpb_offset)?,
        });
        for meta in self.trees.lock().unwrap().values() {
            offsets.push(TreeOffsets {
                info_offset: meta.info_offset,
                header_offset: meta.header_offset,
                root_offset: meta.root_offset,
            });
        }
        checker::check(&self.store, header.first_free_page, &offsets)
    }

    /// Flush any buffered writes to durable storage. There is no separate
    /// in-process close step beyond this: dropping the manager drops the
    /// file handle.
    pub fn close(&self) -> Result<()> {
        self.store.sync()
    }
}

fn tree_root_offset<F: File>(store: &PageStore<F>, header_offset: Offset) -> Result<Offset> {
    let mut reader = crate::btree::read_record(store, header_offset)?;
    let _revision = reader.read_u64()?;
    let _element_count = reader.read_u64()?;
    reader.read_u64()
}

fn tree_info_offset<F: File>(store: &PageStore<F>, header_offset: Offset) -> Result<Offset> {
    let mut reader = crate::btree::read_record(store, header_offset)?;
    let _revision = reader.read_u64()?;
    let _element_count = reader.read_u64()?;
    let _root = reader.read_u64()?;
    reader.read_u64()
}

fn read_tree_meta<F: File>(store: &PageStore<F>, header_offset: Offset) -> Result<TreeMeta> {
    let mut reader = crate::btree::read_record(store, header_offset)?;
    let revision = reader.read_u64()?;
    let element_count = reader.read_u64()?;
    let root_offset = reader.read_u64()?;
    let info_offset = reader.read_u64()?;

    let mut info_reader = crate::btree::read_record(store, info_offset)?;
    let fanout = info_reader.read_u32()? as usize;
    let _name = info_reader.read_blob()?;
    let key_codec_name = String::from_utf8(info_reader.read_blob()?).map_err(|e| Error::Codec(e.to_string()))?;
    let value_codec_name = String::from_utf8(info_reader.read_blob()?).map_err(|e| Error::Codec(e.to_string()))?;
    let allow_duplicates = info_reader.read_u8()? != 0;

    Ok(TreeMeta {
        info_offset,
        header_offset,
        root_offset,
        revision,
        element_count,
        fanout,
        allow_duplicates,
        key_codec_name,
        value_codec_name,
    })
}

fn write_tree_info<F: File>(store: &PageStore<F>, name: &str, key_codec_name: &str, value_codec_name: &str, allow_duplicates: bool, fanout: usize) -> Result<Offset> {
    crate::btree::write_record(store, |w| {
        w.write_u32(fanout as u32)?;
        w.write_blob(name.as_bytes())?;
        w.write_blob(key_codec_name.as_bytes())?;
        w.write_blob(value_codec_name.as_bytes())?;
        w.write_u8(allow_duplicates as u8)
    })
}

fn write_tree_header<F: File>(store: &PageStore<F>, revision: u64, element_count: u64, root_offset: Offset, info_offset: Offset) -> Result<Offset> {
    crate::btree::write_record(store, |w| {
        w.write_u64(revision)?;
        w.write_u64(element_count)?;
        w.write_u64(root_offset)?;
        w.write_u64(info_offset)
    })
}

/// A handle onto one managed tree (§6 `BTreeHandle`): the concrete
/// key/value codecs live here, never in `RecordManager`, so trees of
/// different types can share one file.
pub struct BTreeHandle<'a, F, KC, VC> {
    manager: &'a RecordManager<F>,
    name: String,
    kc: KC,
    vc: VC,
}

impl<'a, F, KC, VC> BTreeHandle<'a, F, KC, VC>
where
    F: File,
    KC: Codec,
    KC::Item: Ord + Clone,
    VC: Codec,
    VC::Item: Clone + Ord,
{
    fn committed_meta(&self) -> Result<TreeMeta> {
        self.manager
            .trees
            .lock()
            .unwrap()
            .get(&self.name)
            .cloned()
            .ok_or_else(|| Error::BTreeNotManaged(self.name.clone()))
    }

    fn current_meta(&self) -> Result<TreeMeta> {
        if let Some(txn) = self.manager.txn.lock().unwrap().as_ref() {
            if let Some(meta) = txn.dirty_trees.get(&self.name) {
                return Ok(meta.clone());
            }
        }
        self.committed_meta()
    }

    /// §6 `tree.insert(key, value) → Option<oldValue>`.
    pub fn insert(&self, key: &KC::Item, value: &VC::Item) -> Result<Option<VC::Item>> {
        self.manager.begin()?;
        match self.insert_inner(key, value) {
            Ok(old) => {
                self.manager.commit()?;
                Ok(old)
            }
            Err(e) => {
                let _ = self.manager.rollback();
                Err(e)
            }
        }
    }

    fn insert_inner(&self, key: &KC::Item, value: &VC::Item) -> Result<Option<VC::Item>> {
        let meta = self.current_meta()?;
        let root = crate::btree::fetch_page(&self.manager.store, meta.root_offset, &self.kc, &self.vc)?;

        let mut txn_guard = self.manager.txn.lock().unwrap();
        let txn = txn_guard.as_mut().expect("insert always runs inside a transaction");
        let ctx = Ctx::new(&self.manager.store, &self.kc, &self.vc, meta.fanout, meta.allow_duplicates, txn.revision);

        let (new_root, old_value, grew) = match crate::btree::insert_root(&root, key, value, &ctx)? {
            crate::btree::RootInsert::Existing(old) => (root, Some(old), false),
            crate::btree::RootInsert::New(new_root) => (new_root, None, true),
        };

        if !grew {
            return Ok(old_value);
        }
        txn.dirty = true;

        let (root_offset, _) = crate::btree::flush_page(&self.manager.store, &self.kc, &self.vc, new_root)?;
        let new_element_count = meta.element_count + 1;
        let new_revision = txn.revision;
        let header_offset = write_tree_header(&self.manager.store, new_revision, new_element_count, root_offset, meta.info_offset)?;

        self.retire(txn, meta.revision, meta.header_offset, ctx.shadowed.into_inner())?;
        self.register_bob(txn, new_revision, header_offset)?;

        txn.dirty_trees.insert(
            self.name.clone(),
            TreeMeta {
                info_offset: meta.info_offset,
                header_offset,
                root_offset,
                revision: new_revision,
                element_count: new_element_count,
                fanout: meta.fanout,
                allow_duplicates: meta.allow_duplicates,
                key_codec_name: meta.key_codec_name,
                value_codec_name: meta.value_codec_name,
            },
        );

        Ok(None)
    }

    /// §6 `tree.delete(key) → Option<(key, value)>`.
    pub fn delete(&self, key: &KC::Item) -> Result<Option<(KC::Item, VC::Item)>> {
        self.manager.begin()?;
        match self.delete_inner(key) {
            Ok(removed) => {
                self.manager.commit()?;
                Ok(removed)
            }
            Err(e) => {
                let _ = self.manager.rollback();
                Err(e)
            }
        }
    }

    fn delete_inner(&self, key: &KC::Item) -> Result<Option<(KC::Item, VC::Item)>> {
        let meta = self.current_meta()?;
        let root = crate::btree::fetch_page(&self.manager.store, meta.root_offset, &self.kc, &self.vc)?;

        let mut txn_guard = self.manager.txn.lock().unwrap();
        let txn = txn_guard.as_mut().expect("delete always runs inside a transaction");
        let ctx = Ctx::new(&self.manager.store, &self.kc, &self.vc, meta.fanout, meta.allow_duplicates, txn.revision);

        let (new_root, removed) = match crate::btree::delete_root(&root, key, &ctx)? {
            crate::btree::RootDelete::NotPresent => return Ok(None),
            crate::btree::RootDelete::Removed(new_root, removed) => (new_root, removed),
        };
        txn.dirty = true;

        let (root_offset, _) = crate::btree::flush_page(&self.manager.store, &self.kc, &self.vc, new_root)?;
        let new_element_count = meta.element_count.saturating_sub(1);
        let new_revision = txn.revision;
        let header_offset = write_tree_header(&self.manager.store, new_revision, new_element_count, root_offset, meta.info_offset)?;

        self.retire(txn, meta.revision, meta.header_offset, ctx.shadowed.into_inner())?;
        self.register_bob(txn, new_revision, header_offset)?;

        txn.dirty_trees.insert(
            self.name.clone(),
            TreeMeta {
                info_offset: meta.info_offset,
                header_offset,
                root_offset,
                revision: new_revision,
                element_count: new_element_count,
                fanout: meta.fanout,
                allow_duplicates: meta.allow_duplicates,
                key_codec_name: meta.key_codec_name,
                value_codec_name: meta.value_codec_name,
            },
        );

        Ok(Some(removed))
    }

    /// Either free the superseded header/data pages immediately, or, when
    /// `setKeepRevisions(true)` is active, register them in the
    /// CopiedPagesBtree so `forget_revision` can release them later.
    fn retire(&self, txn: &mut Txn, old_revision: u64, old_header_offset: Offset, mut shadowed: Vec<Offset>) -> Result<()> {
        shadowed.push(old_header_offset);
        if self.manager.keeps_revisions() {
            let (cpb_kc, cpb_vc) = cpb_codecs();
            let key = CpbKey {
                revision: old_revision,
                name: self.name.clone(),
            };
            let ctx = Ctx::new(&self.manager.store, &cpb_kc, &cpb_vc, 32, false, txn.revision);
            if let crate::btree::RootInsert::New(new_cpb) = crate::btree::insert_root(&txn.cpb_root, &key, &shadowed, &ctx)? {
                txn.cpb_root = new_cpb;
            }
        } else {
            txn.freed_pages.extend(shadowed);
        }
        Ok(())
    }

    fn register_bob(&self, txn: &mut Txn, revision: u64, header_offset: Offset) -> Result<()> {
        let (bob_kc, bob_vc) = bob_codecs();
        let key = BobKey {
            name: self.name.clone(),
            revision,
        };
        let ctx = Ctx::new(&self.manager.store, &bob_kc, &bob_vc, 32, false, txn.revision);
        if let crate::btree::RootInsert::New(new_bob) = crate::btree::insert_root(&txn.bob_root, &key, &header_offset, &ctx)? {
            txn.bob_root = new_bob;
        }
        Ok(())
    }

    /// §6 `tree.get(key, revision?) → Option<value>`.
    pub fn get(&self, key: &KC::Item, revision: Option<u64>) -> Result<Option<VC::Item>> {
        let root_offset = self.root_offset_for(revision)?;
        let root = crate::btree::fetch_page(&self.manager.store, root_offset, &self.kc, &self.vc)?;
        crate::btree::ops::search(&root, key, &self.manager.store, &self.kc, &self.vc)
    }

    /// §6 `tree.browse(revision?) → Cursor`: a lazy ordered sequence of
    /// every `(key, value)` pair.
    pub fn browse(&self, revision: Option<u64>) -> Result<Cursor<'_, F, KC, VC>> {
        let root_offset = self.root_offset_for(revision)?;
        let root = crate::btree::fetch_page(&self.manager.store, root_offset, &self.kc, &self.vc)?;
        Cursor::new(&self.manager.store, &self.kc, &self.vc, root)
    }

    /// Supplemented: a cursor bounded to `[start, end]`.
    pub fn range(&self, start: KC::Item, end: KC::Item, revision: Option<u64>) -> Result<Cursor<'_, F, KC, VC>> {
        let root_offset = self.root_offset_for(revision)?;
        let root = crate::btree::fetch_page(&self.manager.store, root_offset, &self.kc, &self.vc)?;
        Cursor::new_range(&self.manager.store, &self.kc, &self.vc, root, start, end)
    }

    fn root_offset_for(&self, revision: Option<u64>) -> Result<Offset> {
        match revision {
            None => Ok(self.current_meta()?.root_offset),
            Some(rev) => {
                let (bob_kc, bob_vc) = bob_codecs();
                let bob_root_offset = {
                    let header = self.manager.header.lock().unwrap();
                    tree_root_offset(&self.manager.store, header.current_bob_offset)?
                };
                let bob_root = crate::btree::fetch_page(&self.manager.store, bob_root_offset, &bob_kc, &bob_vc)?;
                let key = BobKey {
                    name: self.name.clone(),
                    revision: rev,
                };
                let header_offset = crate::btree::ops::search(&bob_root, &key, &self.manager.store, &bob_kc, &bob_vc)?
                    .ok_or_else(|| Error::BTreeNotManaged(format!("{}@{rev}", self.name)))?;
                tree_root_offset(&self.manager.store, header_offset)
            }
        }
    }

    /// Supplemented: `BTreeHeader.elementCount` for the current revision.
    pub fn len(&self) -> Result<u64> {
        Ok(self.current_meta()?.element_count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
