//! 1000 random puts into a capacity-50 index with integer keys and string
//! values, then verify size, lookups, ordering and close.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{TestDir, entries, random_value};

#[test]
fn test_random_puts() {
    let dir = TestDir::new(50);
    let mut tree = dir.create();
    let mut rng = StdRng::seed_from_u64(1000);
    let mut expected = BTreeMap::new();

    for _ in 0..1000 {
        let key = rng.random_range(0..10_000u32);
        let value = random_value(&mut rng);
        tree.put(&key, &value).expect("put");
        expected.insert(key, value);
    }

    assert_eq!(tree.len(), expected.len() as u64);
    for (key, value) in &expected {
        assert_eq!(tree.get(key).expect("get").as_ref(), Some(value));
    }
    assert_eq!(tree.get(&10_000).expect("get"), None);

    let all = entries(&mut tree);
    assert_eq!(all, expected.into_iter().collect::<Vec<_>>());

    let stats = tree.check_invariants().expect("valid tree");
    assert!(stats.height >= 2);
    assert_eq!(stats.entries, tree.len());

    tree.close().expect("close");
    assert!(tree.is_closed());
    assert!(tree.pages().inner().is_closed());
    assert!(tree.values().is_closed());
}

#[test]
fn test_sequential_puts_fill_leaves() {
    let dir = TestDir::new(50);
    let mut tree = dir.create();

    for key in 0..2000u32 {
        tree.put(&key, &format!("value-{key}")).expect("put");
    }

    let stats = tree.check_invariants().expect("valid tree");
    assert_eq!(stats.entries, 2000);
    assert!(stats.leaf_nodes >= 2000 / 50);
    assert_eq!(tree.first().expect("first"), Some((0, "value-0".to_string())));
    assert_eq!(
        tree.last().expect("last"),
        Some((1999, "value-1999".to_string()))
    );

    tree.close().expect("close");
}
