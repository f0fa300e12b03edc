//! Damaged or mismatched index files are reported as errors, never as
//! wrong answers.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use super::helpers::TestDir;
use crate::btree::{BTreeError, FileTree, MetaError};
use crate::codec::{StringCodec, U32Codec, U64Codec};
use crate::storage::StorageError;

fn populated(node_capacity: usize) -> TestDir {
    let dir = TestDir::new(node_capacity);
    let mut tree = dir.create();
    for key in 0..300u32 {
        tree.put(&key, &format!("value-{key}")).expect("put");
    }
    tree.close().expect("close");
    dir
}

fn overwrite(path: &std::path::Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open for corruption");
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(bytes).expect("write");
}

#[test]
fn test_corrupt_node_page() {
    let dir = populated(8);
    let page_size = dir.config.page_size as u64;

    // Page 1 is the first leaf created and stays the leftmost leaf.
    overwrite(&dir.config.directory_file(), page_size + 40, &[0xFF; 16]);

    let mut tree = dir.open();
    let err = tree.first().expect_err("leftmost leaf is damaged");
    assert!(err.is_corruption(), "unexpected error: {err}");

    let err = tree.check_invariants().expect_err("walk reaches the leaf");
    assert!(err.is_corruption(), "unexpected error: {err}");

    // Keys routed away from the damaged leaf are still readable.
    assert_eq!(tree.get(&299).expect("get"), Some("value-299".to_string()));
}

#[test]
fn test_corrupt_metadata() {
    let dir = populated(8);
    overwrite(&dir.config.directory_file(), 8, b"NOTATREE");

    let result = FileTree::open_files(&dir.config, U32Codec, StringCodec);
    assert!(matches!(
        result,
        Err(BTreeError::Meta(MetaError::InvalidMagic(_)))
    ));
}

#[test]
fn test_open_with_wrong_key_codec() {
    let dir = populated(8);

    let result = FileTree::open_files(&dir.config, U64Codec, StringCodec);
    assert!(matches!(
        result,
        Err(BTreeError::Meta(MetaError::Mismatch {
            field: "key width",
            stored: 4,
            expected: 8
        }))
    ));
}

#[test]
fn test_open_with_wrong_page_size() {
    let dir = populated(8);
    let config = crate::config::IndexConfig {
        page_size: 1024,
        ..dir.config.clone()
    };

    let result = FileTree::open_files(&config, U32Codec, StringCodec);
    assert!(result.is_err());
}

#[test]
fn test_truncated_value_file() {
    let dir = populated(8);
    let file = OpenOptions::new()
        .write(true)
        .open(dir.config.value_file())
        .expect("open value file");
    file.set_len(10).expect("truncate");
    drop(file);

    let mut tree = dir.open();
    assert_eq!(tree.len(), 300);
    assert!(matches!(
        tree.get(&250),
        Err(BTreeError::Storage(StorageError::ValueOutOfBounds { .. }))
    ));
}

#[test]
fn test_oversize_key_rejected() {
    let dir = TestDir::new(8);
    let mut tree = FileTree::create_files(&dir.config, StringCodec, StringCodec)
        .expect("create index");

    let err = tree
        .put(&"k".repeat(5000), &"v".to_string())
        .expect_err("key larger than a page");
    assert!(matches!(err, BTreeError::Capacity(_)));
    assert!(tree.is_empty());
    tree.check_invariants().expect("index unchanged");
}
