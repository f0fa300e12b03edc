//! Common helpers for end-to-end tests.

use rand::Rng;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use tempfile::TempDir;

use crate::btree::FileTree;
use crate::codec::{Codec, KeyCodec, StringCodec, U32Codec};
use crate::config::IndexConfig;

/// A temporary index directory, removed on drop.
pub struct TestDir {
    _dir: TempDir,
    pub config: IndexConfig,
}

impl TestDir {
    /// A fresh directory with the given node capacity and default settings.
    #[must_use]
    pub fn new(node_capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = IndexConfig {
            node_capacity,
            ..IndexConfig::default()
        }
        .with_directory(dir.path().join("index"));

        Self { _dir: dir, config }
    }

    /// Create an integer-keyed, string-valued index.
    pub fn create(&self) -> FileTree<U32Codec, StringCodec> {
        FileTree::create_files(&self.config, U32Codec, StringCodec).expect("create index")
    }

    /// Open the integer-keyed, string-valued index.
    pub fn open(&self) -> FileTree<U32Codec, StringCodec> {
        FileTree::open_files(&self.config, U32Codec, StringCodec).expect("open index")
    }
}

/// Random alphanumeric string with a length in `5..105`.
pub fn random_value(rng: &mut StdRng) -> String {
    let len = rng.random_range(5..105);
    rng.sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Collect every entry of `tree` in iteration order.
pub fn entries<K: KeyCodec, V: Codec>(tree: &mut FileTree<K, V>) -> Vec<(K::Item, V::Item)> {
    tree.iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("iterate index")
}
