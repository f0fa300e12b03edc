//! B+ tree node types and serialization.
//!
//! Every node occupies exactly one page:
//! - Internal nodes: separator keys and child page pointers
//! - Leaf nodes: key/value-reference entries plus a link to the next leaf
//!
//! # Page Layout
//!
//! ```text
//! +-------------+-----------+-----------+-----------+------------------+
//! | Page Header | node_type | key_count | next_leaf | entries...       |
//! | (8 bytes)   | (1 byte)  | (2 bytes) | (8 bytes) |                  |
//! +-------------+-----------+-----------+-----------+------------------+
//! ```
//!
//! Internal entries: `child0 u64`, then `key_count` x `[key][child u64]`.
//! Leaf entries: `key_count` x `[key][ref_tag u8][ref]`.
//!
//! Keys are raw bytes when the key codec has a fixed width, otherwise they
//! carry a `u16` length prefix. Value references are either inline
//! (`u16` length + bytes) or external (`u64` offset + `u32` length).

#![allow(clippy::cast_possible_truncation)]

use crate::storage::io::ValueRecord;
use crate::storage::page::{Page, PageError, PageHeader, PageId, PageType};

/// Node header layout (after page header):
/// - `node_type`: 1 byte (0 = internal, 1 = leaf)
/// - `key_count`: 2 bytes
/// - `next_leaf`: 8 bytes (only for leaf nodes, 0 if none)
///
/// Total: 11 bytes
const NODE_HEADER_SIZE: usize = 11;

/// Offset where node data starts (after page header + node header).
pub const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Size of a child pointer.
pub const CHILD_SIZE: usize = 8;

/// Size of the length prefix on variable-width keys and inline values.
pub const LEN_PREFIX_SIZE: usize = 2;

/// Encoded size of an external value reference including its tag.
pub const EXTERNAL_REF_SIZE: usize = 1 + 8 + 4;

/// `next_leaf` value marking the last leaf in the chain.
///
/// Page 0 always holds the tree metadata, so no leaf can live there.
pub const NO_NEXT_LEAF: PageId = 0;

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Byte geometry shared by every node of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    page_size: usize,
    /// Width of every key, or `None` for length-prefixed keys.
    key_width: Option<usize>,
}

impl NodeLayout {
    #[must_use]
    pub const fn new(page_size: usize, key_width: Option<usize>) -> Self {
        Self {
            page_size,
            key_width,
        }
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub const fn key_width(&self) -> Option<usize> {
        self.key_width
    }

    /// Bytes available for entries in one node.
    #[must_use]
    pub const fn data_space(&self) -> usize {
        self.page_size.saturating_sub(DATA_OFFSET)
    }

    /// Encoded size of `key` within a node.
    #[must_use]
    pub const fn key_size(&self, key: &[u8]) -> usize {
        match self.key_width {
            Some(width) => width,
            None => LEN_PREFIX_SIZE + key.len(),
        }
    }

    /// Largest single entry allowed in a node.
    ///
    /// Splitting an overflowing node at its byte midpoint leaves two halves
    /// that fit a page as long as no entry exceeds a third of the space left
    /// after an internal node's first child pointer.
    #[must_use]
    pub const fn max_entry_size(&self) -> usize {
        self.data_space().saturating_sub(CHILD_SIZE) / 3
    }
}

/// Where a leaf entry's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    /// Value bytes stored in the leaf itself.
    Inline(Vec<u8>),
    /// Value bytes stored in the value store.
    External(ValueRecord),
}

impl ValueRef {
    const INLINE_TAG: u8 = 0;
    const EXTERNAL_TAG: u8 = 1;

    /// Encoded size including the tag byte.
    #[must_use]
    pub const fn encoded_size(&self) -> usize {
        match self {
            Self::Inline(bytes) => 1 + LEN_PREFIX_SIZE + bytes.len(),
            Self::External(_) => EXTERNAL_REF_SIZE,
        }
    }
}

/// A key/value-reference entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: ValueRef,
}

/// An internal (non-leaf) node.
///
/// Stores N keys and N+1 child pointers.
/// `Child[i]` contains keys < `Key[i]`
/// `Child[i+1]` contains keys >= `Key[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    /// Keys in sorted order.
    pub keys: Vec<Vec<u8>>,
    /// Child page pointers. `children.len()` == `keys.len()` + 1
    pub children: Vec<PageId>,
}

impl InternalNode {
    /// Create an internal node with two children, as a new root.
    #[must_use]
    pub fn with_children(left_child: PageId, key: Vec<u8>, right_child: PageId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Find the child index for a given key.
    ///
    /// A separator equal to the key routes to its right child.
    #[must_use]
    pub fn find_child_index(&self, key: &[u8]) -> usize {
        match self.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Insert a separator and the child to its right.
    pub fn insert(&mut self, key: Vec<u8>, right_child: PageId) {
        let idx = self.find_child_index(&key);
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, right_child);
    }

    /// Encoded size of the node's entries.
    #[must_use]
    pub fn encoded_size(&self, layout: &NodeLayout) -> usize {
        CHILD_SIZE
            + self
                .keys
                .iter()
                .map(|k| layout.key_size(k) + CHILD_SIZE)
                .sum::<usize>()
    }

    /// Split the node, returning the promoted median key and the new right node.
    ///
    /// The median is chosen so both halves hold about the same number of bytes.
    #[must_use]
    pub fn split(&mut self, layout: &NodeLayout) -> (Vec<u8>, Self) {
        let sizes: Vec<usize> = self
            .keys
            .iter()
            .map(|k| layout.key_size(k) + CHILD_SIZE)
            .collect();
        let mid = if sizes.len() >= 3 {
            balanced_split_index(&sizes).clamp(1, sizes.len() - 2)
        } else {
            sizes.len() / 2
        };

        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let median_key = self.keys.pop().unwrap_or_default();

        let right = Self {
            keys: right_keys,
            children: right_children,
        };

        (median_key, right)
    }
}

/// A leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry>,
    /// Next leaf in key order, or `NO_NEXT_LEAF`.
    pub next_leaf: PageId,
}

impl LeafNode {
    /// Create a new empty leaf node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_leaf: NO_NEXT_LEAF,
        }
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.key.as_slice().cmp(key))
    }

    /// Get a value reference by key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&ValueRef> {
        self.find_index(key).ok().map(|i| &self.entries[i].value)
    }

    /// Insert or update an entry.
    ///
    /// Returns the old value reference if updating, None if inserting.
    pub fn insert(&mut self, key: Vec<u8>, value: ValueRef) -> Option<ValueRef> {
        match self.find_index(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, LeafEntry { key, value });
                None
            }
        }
    }

    /// Encoded size of the node's entries.
    #[must_use]
    pub fn encoded_size(&self, layout: &NodeLayout) -> usize {
        self.entries
            .iter()
            .map(|e| layout.key_size(&e.key) + e.value.encoded_size())
            .sum()
    }

    /// Split the node, returning the split key and the new right node.
    ///
    /// The right node takes over this node's `next_leaf`; the caller links
    /// this node to the right node once it has a page.
    #[must_use]
    pub fn split(&mut self, layout: &NodeLayout) -> (Vec<u8>, Self) {
        let sizes: Vec<usize> = self
            .entries
            .iter()
            .map(|e| layout.key_size(&e.key) + e.value.encoded_size())
            .collect();
        let mid = balanced_split_index(&sizes).clamp(1, sizes.len().saturating_sub(1).max(1));

        let right_entries = self.entries.split_off(mid.min(self.entries.len()));
        let split_key = right_entries
            .first()
            .map(|e| e.key.clone())
            .unwrap_or_default();

        let right = Self {
            entries: right_entries,
            next_leaf: self.next_leaf,
        };

        (split_key, right)
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded tree page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// Number of keys (internal) or entries (leaf).
    #[must_use]
    pub const fn key_count(&self) -> usize {
        match self {
            Self::Internal(node) => node.keys.len(),
            Self::Leaf(node) => node.entries.len(),
        }
    }

    /// Encoded size of the node's entries.
    #[must_use]
    pub fn encoded_size(&self, layout: &NodeLayout) -> usize {
        match self {
            Self::Internal(node) => node.encoded_size(layout),
            Self::Leaf(node) => node.encoded_size(layout),
        }
    }

    /// Read a node from a page, verifying its checksum.
    pub fn from_page(page: &Page, layout: &NodeLayout) -> Result<Self, NodeError> {
        let header = PageHeader::from_page(page).map_err(NodeError::Page)?;
        page.verify_checksum().map_err(NodeError::Page)?;

        let raw_type = page.read_u8(PageHeader::SIZE);
        let node_type = NodeType::try_from(raw_type).map_err(NodeError::UnknownNodeType)?;
        match (header.page_type, node_type) {
            (PageType::Internal, NodeType::Internal) | (PageType::Leaf, NodeType::Leaf) => {}
            (page_type, _) => return Err(NodeError::WrongPageType(page_type)),
        }

        let key_count = page.read_u16(PageHeader::SIZE + 1) as usize;
        let next_leaf = page.read_u64(PageHeader::SIZE + 3);
        let mut reader = Reader::new(page, DATA_OFFSET);

        match node_type {
            NodeType::Internal => {
                let mut keys = Vec::with_capacity(key_count);
                let mut children = Vec::with_capacity(key_count + 1);

                children.push(reader.u64()?);
                for _ in 0..key_count {
                    keys.push(reader.key(layout)?);
                    children.push(reader.u64()?);
                }

                Ok(Self::Internal(InternalNode { keys, children }))
            }
            NodeType::Leaf => {
                let mut entries = Vec::with_capacity(key_count);

                for _ in 0..key_count {
                    let key = reader.key(layout)?;
                    let value = match reader.u8()? {
                        ValueRef::INLINE_TAG => {
                            let len = reader.u16()? as usize;
                            ValueRef::Inline(reader.bytes(len)?.to_vec())
                        }
                        ValueRef::EXTERNAL_TAG => {
                            let offset = reader.u64()?;
                            let length = reader.u32()?;
                            ValueRef::External(ValueRecord::new(offset, length))
                        }
                        tag => return Err(NodeError::UnknownValueTag(tag)),
                    };
                    entries.push(LeafEntry { key, value });
                }

                Ok(Self::Leaf(LeafNode { entries, next_leaf }))
            }
        }
    }

    /// Write the node into a fresh, sealed page.
    ///
    /// The caller must have checked that the node fits the layout.
    #[must_use]
    pub fn to_page(&self, layout: &NodeLayout) -> Page {
        let mut page = Page::new(layout.page_size());

        let (page_type, node_type, next_leaf) = match self {
            Self::Internal(_) => (PageType::Internal, NodeType::Internal, NO_NEXT_LEAF),
            Self::Leaf(leaf) => (PageType::Leaf, NodeType::Leaf, leaf.next_leaf),
        };
        let page_header = PageHeader {
            page_type,
            flags: 0,
            checksum: 0,
        };
        page.write_bytes(0, &page_header.to_bytes());
        page.write_u8(PageHeader::SIZE, node_type as u8);
        page.write_u16(PageHeader::SIZE + 1, self.key_count() as u16);
        page.write_u64(PageHeader::SIZE + 3, next_leaf);

        let mut offset = DATA_OFFSET;
        match self {
            Self::Internal(node) => {
                page.write_u64(offset, node.children.first().copied().unwrap_or_default());
                offset += CHILD_SIZE;

                for (key, child) in node.keys.iter().zip(node.children.iter().skip(1)) {
                    offset = write_key(&mut page, offset, key, layout);
                    page.write_u64(offset, *child);
                    offset += CHILD_SIZE;
                }
            }
            Self::Leaf(leaf) => {
                for entry in &leaf.entries {
                    offset = write_key(&mut page, offset, &entry.key, layout);
                    match &entry.value {
                        ValueRef::Inline(bytes) => {
                            page.write_u8(offset, ValueRef::INLINE_TAG);
                            page.write_u16(offset + 1, bytes.len() as u16);
                            page.write_bytes(offset + 3, bytes);
                            offset += 3 + bytes.len();
                        }
                        ValueRef::External(record) => {
                            page.write_u8(offset, ValueRef::EXTERNAL_TAG);
                            page.write_u64(offset + 1, record.offset);
                            page.write_u32(offset + 9, record.length);
                            offset += EXTERNAL_REF_SIZE;
                        }
                    }
                }
            }
        }

        page.seal();
        page
    }
}

fn write_key(page: &mut Page, offset: usize, key: &[u8], layout: &NodeLayout) -> usize {
    if let Some(width) = layout.key_width() {
        page.write_bytes(offset, &key[..width]);
        offset + width
    } else {
        page.write_u16(offset, key.len() as u16);
        page.write_bytes(offset + LEN_PREFIX_SIZE, key);
        offset + LEN_PREFIX_SIZE + key.len()
    }
}

/// Index at which to split so the left part holds about half the bytes.
fn balanced_split_index(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    let mut prefix = 0;
    for (i, size) in sizes.iter().enumerate() {
        prefix += size;
        if prefix * 2 >= total {
            return i + 1;
        }
    }
    sizes.len()
}

/// Bounds-checked sequential reader over a page.
struct Reader<'a> {
    page: &'a Page,
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn new(page: &'a Page, offset: usize) -> Self {
        Self { page, offset }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let end = self.offset + len;
        if end > self.page.size() {
            return Err(NodeError::Truncated {
                offset: self.offset,
                needed: len,
            });
        }
        let bytes = &self.page.as_bytes()[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, NodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, NodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, NodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn key(&mut self, layout: &NodeLayout) -> Result<Vec<u8>, NodeError> {
        let len = match layout.key_width() {
            Some(width) => width,
            None => self.u16()? as usize,
        };
        Ok(self.bytes(len)?.to_vec())
    }
}

/// Errors that can occur when decoding B+ tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Invalid page header or checksum.
    Page(PageError),
    /// Page type is not a tree node, or disagrees with the node type.
    WrongPageType(PageType),
    /// Unknown node type byte.
    UnknownNodeType(u8),
    /// Unknown value reference tag.
    UnknownValueTag(u8),
    /// Entry data runs past the end of the page.
    Truncated { offset: usize, needed: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "invalid node page: {e}"),
            Self::WrongPageType(t) => write!(f, "page type {t:?} does not hold a tree node"),
            Self::UnknownNodeType(t) => write!(f, "unknown node type: 0x{t:02x}"),
            Self::UnknownValueTag(t) => write!(f, "unknown value reference tag: 0x{t:02x}"),
            Self::Truncated { offset, needed } => {
                write!(f, "node entry truncated: {needed} bytes at offset {offset}")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}
