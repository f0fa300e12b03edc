//! Variable-size string keys, where splits are driven by page space.

use std::collections::BTreeMap;

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{TestDir, entries};
use crate::btree::FileTree;
use crate::codec::StringCodec;

#[test]
fn test_string_keys_roundtrip() {
    let dir = TestDir::new(500);
    let mut rng = StdRng::seed_from_u64(11);
    let mut expected = BTreeMap::new();

    let mut tree =
        FileTree::create_files(&dir.config, StringCodec, StringCodec).expect("create index");
    for i in 0..600 {
        let len = rng.random_range(1..300);
        let key: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        let value = format!("entry {i}");
        tree.put(&key, &value).expect("put");
        expected.insert(key, value);
    }

    let stats = tree.check_invariants().expect("valid tree");
    assert!(stats.height >= 2);
    assert_eq!(entries(&mut tree), expected.clone().into_iter().collect::<Vec<_>>());
    tree.close().expect("close");

    let mut tree =
        FileTree::open_files(&dir.config, StringCodec, StringCodec).expect("open index");
    for (key, value) in &expected {
        assert_eq!(tree.get(key).expect("get").as_ref(), Some(value));
    }
}

#[test]
fn test_string_range_from() {
    let dir = TestDir::new(4);
    let mut tree =
        FileTree::create_files(&dir.config, StringCodec, StringCodec).expect("create index");

    for word in ["apple", "banana", "cherry", "date", "elderberry", "fig", "grape"] {
        tree.put(&word.to_string(), &word.to_uppercase())
            .expect("put");
    }

    let from_c: Vec<String> = tree
        .range_from(&"c".to_string())
        .map(|e| e.expect("entry").0)
        .collect();
    assert_eq!(from_c, ["cherry", "date", "elderberry", "fig", "grape"]);

    let (key, value) = tree
        .range_from(&"dz".to_string())
        .next()
        .expect("an entry follows")
        .expect("entry");
    assert_eq!(key, "elderberry");
    assert_eq!(value, "ELDERBERRY");
}
