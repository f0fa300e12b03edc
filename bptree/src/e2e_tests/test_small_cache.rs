//! A one-page cache forces a write-back on nearly every access; results
//! must match an unbounded cache.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{TestDir, entries, random_value};

fn run_workload(cache_pages: Option<usize>) -> Vec<(u32, String)> {
    let mut dir = TestDir::new(10);
    dir.config.cache_pages = cache_pages;
    let mut rng = StdRng::seed_from_u64(5);

    let mut tree = dir.create();
    for _ in 0..400 {
        let key = rng.random_range(0..1000u32);
        tree.put(&key, &random_value(&mut rng)).expect("put");
    }
    tree.check_invariants().expect("valid tree");
    let before_close = entries(&mut tree);
    tree.close().expect("close");

    let mut tree = dir.open();
    assert_eq!(entries(&mut tree), before_close);
    before_close
}

#[test]
fn test_single_page_cache_matches_unbounded() {
    let tiny = run_workload(Some(1));
    let unbounded = run_workload(None);
    assert_eq!(tiny, unbounded);
}

#[test]
fn test_single_page_cache_evicts() {
    let mut dir = TestDir::new(10);
    dir.config.cache_pages = Some(1);

    let mut tree = dir.create();
    for key in 0..200u32 {
        tree.put(&key, &key.to_string()).expect("put");
    }

    let stats = tree.pages().stats();
    assert!(stats.evictions > 0);
    assert!(stats.write_backs > 0);
    assert_eq!(tree.pages().cached_pages(), 1);
    tree.close().expect("close");
}
