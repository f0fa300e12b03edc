//! Overwriting a key replaces its value without changing the size; the old
//! value bytes stay behind in the value file.

use super::helpers::TestDir;
use crate::storage::ValueStore;

#[test]
fn test_overwrite_replaces_value() {
    let dir = TestDir::new(8);
    let mut tree = dir.create();

    for key in 0..20u32 {
        tree.put(&key, &"original".to_string()).expect("put");
    }
    let values_before = tree.values().len();

    for round in 0..5 {
        tree.put(&7, &format!("round {round}")).expect("overwrite");
    }

    assert_eq!(tree.len(), 20);
    assert_eq!(tree.get(&7).expect("get"), Some("round 4".to_string()));
    assert_eq!(tree.get(&8).expect("get"), Some("original".to_string()));
    assert!(tree.values().len() > values_before);
    tree.close().expect("close");

    let mut tree = dir.open();
    assert_eq!(tree.len(), 20);
    assert_eq!(tree.get(&7).expect("get"), Some("round 4".to_string()));
}
