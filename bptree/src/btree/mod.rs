//! Disk-backed B+ tree index.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: separator keys and child page pointers
//! - Leaf nodes: key/value-reference entries, singly linked left to right
//!   for ordered scans
//!
//! # Keys
//!
//! Keys are compared as encoded bytes, so key codecs must be
//! order-preserving (`KeyCodec`).
//!
//! # Usage
//!
//! ```
//! use bptree::btree::BPlusTree;
//! use bptree::codec::{StringCodec, U32Codec};
//! use bptree::storage::{MemoryPageStore, MemoryValueStore};
//!
//! let mut tree = BPlusTree::create(
//!     MemoryPageStore::new(4096),
//!     MemoryValueStore::new(),
//!     U32Codec,
//!     StringCodec,
//!     50,
//! )?;
//!
//! tree.put(&7, &"seven".to_string())?;
//! assert_eq!(tree.get(&7)?, Some("seven".to_string()));
//! assert_eq!(tree.len(), 1);
//! tree.close()?;
//! # Ok::<(), bptree::btree::BTreeError>(())
//! ```

pub mod meta;
pub mod node;
mod tree;

pub use meta::{MetaError, TreeMeta};
pub use node::{NodeError, ValueRef};
pub use tree::{
    BPlusTree, BTreeError, CapacityError, FileTree, Iter, MAX_INLINE_VALUE_SIZE, MIN_NODE_CAPACITY,
    TreeStats,
};
