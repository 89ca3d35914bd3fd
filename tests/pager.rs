//! End-to-end scenarios against a real temp file, exercising
//! `RecordManager`/`BTreeHandle` the way a library consumer would.
//!
//! Revisions are numbered globally across the whole file (one monotonic
//! counter on `RecordManager`, not per tree): `add_tree` itself consumes
//! the first revision, so the Nth `insert`/`delete` against a freshly
//! created tree commits at revision `N + 1`.

use std::fs::OpenOptions;

use btreefile::{BincodeCodec, RecordManager, U64Codec};

fn temp_file() -> std::fs::File {
    let path = tempfile::Builder::new().prefix("btreefile-test").tempfile().unwrap().into_temp_path();
    OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path).unwrap()
}

fn small_manager() -> RecordManager<std::fs::File> {
    RecordManager::create(temp_file(), 64).unwrap()
}

/// S1: open new file, add tree "T", insert one key, commit; get hits and
/// misses behave as expected.
#[test]
fn s1_insert_then_get_hit_and_miss() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();

    assert_eq!(tree.insert(&10, &1).unwrap(), None);

    assert_eq!(tree.get(&10, None).unwrap(), Some(1));
    assert_eq!(tree.get(&11, None).unwrap(), None);
}

/// S2: forcing a leaf split, browse yields every key in order.
#[test]
fn s2_leaf_split_then_ordered_browse() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();

    tree.insert(&10, &1).unwrap();
    tree.insert(&20, &2).unwrap();
    tree.insert(&30, &3).unwrap();
    tree.insert(&40, &4).unwrap();
    tree.insert(&50, &5).unwrap();

    let entries: Vec<(u64, u64)> = tree.browse(None).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries, vec![(10, 1), (20, 2), (30, 3), (40, 4), (50, 5)]);
}

/// S3: deleting a key that forced an earlier split leaves the remaining
/// keys reachable and the deleted key gone.
#[test]
fn s3_delete_after_split_rebalances() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();

    for (k, v) in [(10, 1), (20, 2), (30, 3), (40, 4), (50, 5)] {
        tree.insert(&k, &v).unwrap();
    }

    assert_eq!(tree.delete(&10).unwrap(), Some((10, 1)));
    assert_eq!(tree.get(&10, None).unwrap(), None);

    let entries: Vec<(u64, u64)> = tree.browse(None).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries, vec![(20, 2), (30, 3), (40, 4), (50, 5)]);
}

/// S4: with `setKeepRevisions(true)`, an old revision's key stays readable
/// after a later commit supersedes it.
#[test]
fn s4_keep_revisions_preserves_old_snapshot() {
    let rm = small_manager();
    rm.set_keep_revisions(true);
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();

    // `add_tree` itself commits revision 1 (an empty tree); each insert
    // below commits the next revision in order.
    tree.insert(&10, &1).unwrap(); // revision 2: {10}
    tree.insert(&20, &2).unwrap(); // revision 3: {10, 20}
    const REVISION_WITH_20: u64 = 3;
    tree.insert(&30, &3).unwrap(); // revision 4
    tree.insert(&40, &4).unwrap(); // revision 5

    tree.delete(&20).unwrap(); // revision 6: {10, 30, 40}

    assert_eq!(tree.get(&20, None).unwrap(), None);
    assert_eq!(tree.get(&20, Some(REVISION_WITH_20)).unwrap(), Some(2));
}

/// S5: integrity checker on a handful of inserts reports no violations
/// and accounts for every page.
#[test]
fn s5_integrity_check_accounts_for_every_page() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();

    for i in 0..32u64 {
        tree.insert(&i, &(i * 10)).unwrap();
    }

    let report = rm.check().unwrap();
    assert!(report.is_ok(), "violations: {:?}", report.violations);
    assert_eq!(report.free_pages + report.live_pages, report.total_pages);
}

/// Idempotence (§8 property 7): deleting an absent key is a no-op.
#[test]
fn delete_of_absent_key_is_a_no_op() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
    tree.insert(&1, &1).unwrap();

    assert_eq!(tree.delete(&999).unwrap(), None);
    assert_eq!(tree.get(&1, None).unwrap(), Some(1));
}

/// Reopening a file reconstructs every managed tree from the
/// Btree-of-Btrees and resumes reads/writes against it.
#[test]
fn reopen_recovers_managed_trees_and_their_data() {
    let tmp = tempfile::Builder::new().prefix("btreefile-reopen").tempfile().unwrap();
    let path = tmp.into_temp_path().keep().unwrap();

    {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path).unwrap();
        let rm = RecordManager::create(file, 64).unwrap();
        let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
        tree.insert(&1, &100).unwrap();
        tree.insert(&2, &200).unwrap();
        rm.close().unwrap();
    }

    {
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let rm = RecordManager::open(file).unwrap();
        assert_eq!(rm.tree_names(), vec!["T".to_string()]);
        let tree = rm.tree("T", U64Codec, U64Codec).unwrap();
        assert_eq!(tree.get(&1, None).unwrap(), Some(100));
        assert_eq!(tree.get(&2, None).unwrap(), Some(200));
    }

    std::fs::remove_file(&path).ok();
}

/// `addTree` refuses a duplicate name.
#[test]
fn add_tree_rejects_duplicate_name() {
    let rm = small_manager();
    rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
    let err = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap_err();
    assert!(matches!(err, btreefile::Error::BTreeAlreadyManaged(name) if name == "T"));
}

/// A non-duplicate-allowing tree reports the previous value on overwrite.
#[test]
fn insert_over_existing_key_without_duplicates_returns_old_value() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
    assert_eq!(tree.insert(&1, &1).unwrap(), None);
    assert_eq!(tree.insert(&1, &2).unwrap(), Some(1));
    assert_eq!(tree.get(&1, None).unwrap(), Some(2));
}

/// A duplicate-allowing tree stacks multiple values under one key and
/// `browse` yields each one.
#[test]
fn duplicate_keys_are_flattened_by_browse() {
    let rm = small_manager();
    let tree = rm.add_tree("tags", U64Codec, BincodeCodec::<String>::new(), true, 4).unwrap();

    tree.insert(&1, &"a".to_string()).unwrap();
    tree.insert(&1, &"b".to_string()).unwrap();
    tree.insert(&1, &"c".to_string()).unwrap();

    let mut values: Vec<String> = tree
        .browse(None)
        .unwrap()
        .collect::<Result<Vec<(u64, String)>, _>>()
        .unwrap()
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    values.sort();
    assert_eq!(values, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
}

/// §6 `open(path, pageSize?)`: a plain file path creates the file on first
/// open and reopens it as-is thereafter.
#[test]
fn open_path_creates_then_reopens_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let rm = RecordManager::open_path(&path, Some(64)).unwrap();
        let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
        tree.insert(&1, &100).unwrap();
        rm.close().unwrap();
    }

    let rm = RecordManager::open_path(&path, None).unwrap();
    let tree = rm.tree("T", U64Codec, U64Codec).unwrap();
    assert_eq!(tree.get(&1, None).unwrap(), Some(100));
}

/// §6 `open(path, pageSize?)`: a directory path falls back to the default
/// file name inside it.
#[test]
fn open_path_on_a_directory_uses_the_default_file_name() {
    let dir = tempfile::tempdir().unwrap();

    let rm = RecordManager::open_path(dir.path(), Some(64)).unwrap();
    rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
    drop(rm);

    assert!(dir.path().join(btreefile::DEFAULT_FILE_NAME).exists());
}

/// `Cursor::range` bounds the scan to `[start, end]` inclusive.
#[test]
fn range_cursor_is_bounded_inclusive() {
    let rm = small_manager();
    let tree = rm.add_tree("T", U64Codec, U64Codec, false, 4).unwrap();
    for i in 0..10u64 {
        tree.insert(&i, &i).unwrap();
    }

    let entries: Vec<(u64, u64)> = tree.range(3, 6, None).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries, vec![(3, 3), (4, 4), (5, 5), (6, 6)]);
}
