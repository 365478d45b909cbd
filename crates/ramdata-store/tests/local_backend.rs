// SPDX-License-Identifier: Apache-2.0

use ramdata_store::backends::local::LocalFsStore;
use ramdata_store::{BackingStore, StoreErrorCode};
use tempfile::tempdir;

#[test]
fn put_get_and_ranges_round_trip_on_disk() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    store.put("a/b/blob", b"0123456789").expect("put");
    assert_eq!(store.get("a/b/blob").expect("get"), b"0123456789");
    assert_eq!(store.get_range("a/b/blob", 2, 5).expect("range"), b"234");
    assert!(store.exists("a/b").expect("exists dir"));
    assert!(!store.exists("a/c").expect("exists missing"));
}

#[test]
fn missing_keys_are_not_found() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    let err = store.get("nope").expect_err("missing");
    assert_eq!(err.code, StoreErrorCode::NotFound);
    store.remove("nope").expect("removing an absent key is a no-op");
}

#[test]
fn create_exclusive_succeeds_once() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    assert!(store.create_exclusive("col.lock").expect("first"));
    assert!(!store.create_exclusive("col.lock").expect("second"));
    store.remove("col.lock").expect("remove");
    assert!(store.create_exclusive("col.lock").expect("after release"));
}

#[test]
fn copy_and_rename_move_whole_trees() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    store.put("src/x/0", b"a").expect("put");
    store.put("src/.zattrs", b"{}").expect("put");
    store.copy("src", "dup").expect("copy");
    assert_eq!(store.get("dup/x/0").expect("copied"), b"a");

    store.rename("dup", "moved").expect("rename");
    assert!(!store.exists("dup").expect("exists"));
    assert_eq!(store.list("moved").expect("list"), vec![".zattrs", "x"]);

    let err = store.rename("src", "moved").expect_err("destination exists");
    assert_eq!(err.code, StoreErrorCode::Conflict);
}

#[test]
fn keys_escaping_the_root_are_rejected() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    for key in ["../outside", "/abs", "a/../../b"] {
        let err = store.put(key, b"x").expect_err("escaping key");
        assert_eq!(err.code, StoreErrorCode::Validation, "{key}");
    }
}

#[test]
fn listing_a_missing_directory_is_empty() {
    let root = tempdir().expect("tempdir");
    let store = LocalFsStore::new(root.path().to_path_buf());
    assert!(store.list("nothing/here").expect("list").is_empty());
}
