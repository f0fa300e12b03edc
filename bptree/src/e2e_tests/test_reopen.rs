//! Closing and reopening the index files preserves contents, size and
//! height, and the reopened index keeps accepting writes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{TestDir, entries, random_value};
use crate::btree::FileTree;
use crate::codec::{StringCodec, U32Codec};

#[test]
fn test_reopen_preserves_contents() {
    let dir = TestDir::new(16);
    let mut rng = StdRng::seed_from_u64(77);

    let (before, height) = {
        let mut tree = dir.create();
        for _ in 0..500 {
            let key = rng.random_range(0..5000u32);
            tree.put(&key, &random_value(&mut rng)).expect("put");
        }
        let before = entries(&mut tree);
        let height = tree.height();
        tree.close().expect("close");
        (before, height)
    };

    let mut tree = dir.open();
    assert_eq!(tree.len(), before.len() as u64);
    assert_eq!(tree.height(), height);
    assert_eq!(tree.node_capacity(), 16);
    assert_eq!(entries(&mut tree), before);
    tree.check_invariants().expect("valid tree");

    tree.put(&9999, &"after reopen".to_string()).expect("put");
    assert_eq!(tree.len(), before.len() as u64 + 1);
    tree.close().expect("close");

    let mut tree = dir.open();
    assert_eq!(
        tree.get(&9999).expect("get"),
        Some("after reopen".to_string())
    );
}

#[test]
fn test_drop_closes_index() {
    let dir = TestDir::new(8);

    {
        let mut tree = dir.create();
        for key in 0..100u32 {
            tree.put(&key, &key.to_string()).expect("put");
        }
        // Dropped without an explicit close.
    }

    let mut tree = dir.open();
    assert_eq!(tree.len(), 100);
    assert_eq!(tree.get(&42).expect("get"), Some("42".to_string()));
}

#[test]
fn test_open_or_create() {
    let dir = TestDir::new(8);

    {
        let mut tree = FileTree::open_or_create_files(&dir.config, U32Codec, StringCodec)
            .expect("create on first use");
        assert!(tree.is_empty());
        tree.put(&1, &"one".to_string()).expect("put");
        tree.close().expect("close");
    }

    let mut tree = FileTree::open_or_create_files(&dir.config, U32Codec, StringCodec)
        .expect("open on second use");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get(&1).expect("get"), Some("one".to_string()));
}

#[test]
fn test_create_refuses_existing_files() {
    let dir = TestDir::new(8);
    dir.create().close().expect("close");

    let result = FileTree::create_files(&dir.config, U32Codec, StringCodec);
    assert!(result.is_err());
}

#[test]
fn test_flush_persists_without_close() {
    let dir = TestDir::new(8);
    let mut tree = dir.create();
    for key in 0..50u32 {
        tree.put(&key, &"x".repeat(key as usize)).expect("put");
    }
    tree.flush().expect("flush");

    // A second handle sees everything flushed so far.
    let mut other = dir.open();
    assert_eq!(other.len(), 50);
    assert_eq!(other.get(&49).expect("get"), Some("x".repeat(49)));
    other.close().expect("close");

    tree.close().expect("close");
}
