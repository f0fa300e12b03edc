//! Disk-backed B+ tree.
//!
//! The tree maps keys to values through a pair of codecs and stores its
//! nodes as pages of a `PageStore`:
//! - Page 0 holds the tree metadata (`TreeMeta`)
//! - Every other allocated page holds exactly one node
//!
//! Values of a fixed-size codec no wider than `MAX_INLINE_VALUE_SIZE` are
//! stored inline in the leaf. All other values are appended to the
//! `ValueStore` and the leaf keeps a 13-byte reference instead.
//!
//! Insertion records the root-to-leaf path while descending and walks it
//! back up to propagate splits, so nodes never store parent pointers.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::meta::{META_PAGE_ID, MetaError, TreeMeta};
use crate::btree::node::{
    CHILD_SIZE, EXTERNAL_REF_SIZE, InternalNode, LEN_PREFIX_SIZE, LeafEntry, LeafNode, NO_NEXT_LEAF,
    Node, NodeError, NodeLayout, ValueRef,
};
use crate::codec::{Codec, CodecError, KeyCodec};
use crate::config::{ConfigError, IndexConfig};
use crate::storage::buffered::BufferedPageStore;
use crate::storage::file::PageFile;
use crate::storage::io::{PageStore, StorageError, ValueStore};
use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageId, PageType};
use crate::storage::values::ValueFile;

/// Smallest accepted node capacity.
pub const MIN_NODE_CAPACITY: usize = 3;

/// Largest fixed value width stored inline in leaves.
pub const MAX_INLINE_VALUE_SIZE: usize = 64;

/// Structural summary produced by `BPlusTree::check_invariants`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: u32,
    pub internal_nodes: u64,
    pub leaf_nodes: u64,
    pub entries: u64,
}

/// A node on the path from the root to a leaf.
type PathEntry = (PageId, InternalNode);

/// A decoded key/value pair.
type Entry<K, V> = (<K as Codec>::Item, <V as Codec>::Item);

/// A subtree awaiting validation: page, depth and the key bounds it must
/// respect (lower inclusive, upper exclusive).
type PendingNode = (PageId, u32, Option<Vec<u8>>, Option<Vec<u8>>);

/// Result of descending from the root to a leaf.
struct Descent {
    leaf_id: PageId,
    leaf: LeafNode,
    path: Vec<PathEntry>,
}

/// A B+ tree over a page store and a value store.
pub struct BPlusTree<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> {
    pages: S,
    values: D,
    key_codec: K,
    value_codec: V,
    layout: NodeLayout,
    capacity: usize,
    inline_values: bool,
    meta: TreeMeta,
    closed: bool,
}

/// A tree stored in a buffered page file and a value file.
pub type FileTree<K, V> = BPlusTree<K, V, BufferedPageStore<PageFile>, ValueFile>;

impl<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> BPlusTree<K, V, S, D> {
    /// Create a new, empty tree in an empty page store.
    ///
    /// Allocates the metadata page and an empty root leaf.
    pub fn create(
        mut pages: S,
        values: D,
        key_codec: K,
        value_codec: V,
        node_capacity: usize,
    ) -> Result<Self, BTreeError> {
        if pages.total_pages() != 0 {
            return Err(BTreeError::InvalidConfig(format!(
                "cannot create a tree in a page store holding {} pages",
                pages.total_pages()
            )));
        }
        let (layout, inline_values) =
            plan_layout(pages.page_size(), node_capacity, &key_codec, &value_codec)?;

        let meta_id = pages.allocate_page()?;
        let root_id = pages.allocate_page()?;
        debug_assert_eq!(meta_id, META_PAGE_ID);

        let meta = TreeMeta {
            page_size: pages.page_size() as u32,
            node_capacity: node_capacity as u32,
            key_width: width_field(key_codec.fixed_size()),
            value_width: width_field(value_codec.fixed_size()),
            root: root_id,
            entry_count: 0,
            height: 1,
        };

        let mut tree = Self {
            pages,
            values,
            key_codec,
            value_codec,
            layout,
            capacity: node_capacity,
            inline_values,
            meta,
            closed: false,
        };
        tree.write_node(root_id, &Node::Leaf(LeafNode::new()))?;
        tree.write_meta()?;

        tracing::info!(
            page_size = tree.meta.page_size,
            node_capacity,
            inline_values,
            "created tree"
        );
        Ok(tree)
    }

    /// Open an existing tree.
    ///
    /// The node capacity is the one stored at creation. Fails with
    /// `MetaError::Mismatch` if the codecs' widths differ from the stored ones.
    pub fn open(mut pages: S, values: D, key_codec: K, value_codec: V) -> Result<Self, BTreeError> {
        if pages.total_pages() == 0 {
            return Err(BTreeError::InvalidConfig(
                "cannot open a tree in an empty page store".to_string(),
            ));
        }

        let page = pages.read_page(META_PAGE_ID)?;
        let meta = TreeMeta::from_page(&page)?;
        meta.check_layout(
            meta.node_capacity,
            width_field(key_codec.fixed_size()),
            width_field(value_codec.fixed_size()),
        )?;

        let capacity = meta.node_capacity as usize;
        let (layout, inline_values) =
            plan_layout(pages.page_size(), capacity, &key_codec, &value_codec)?;

        if meta.height == 0 || meta.root == META_PAGE_ID || meta.root >= pages.total_pages() {
            return Err(BTreeError::InvariantViolation(format!(
                "metadata names root page {} at height {} in a file of {} pages",
                meta.root,
                meta.height,
                pages.total_pages()
            )));
        }

        tracing::info!(
            root = meta.root,
            entries = meta.entry_count,
            height = meta.height,
            "opened tree"
        );
        Ok(Self {
            pages,
            values,
            key_codec,
            value_codec,
            layout,
            capacity,
            inline_values,
            meta,
            closed: false,
        })
    }

    /// Number of distinct keys in the tree.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.meta.entry_count
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.meta.entry_count == 0
    }

    /// Number of levels; a tree whose root is a leaf has height 1.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.meta.height
    }

    /// Maximum keys per node.
    #[must_use]
    pub const fn node_capacity(&self) -> usize {
        self.capacity
    }

    /// Whether values are stored inline in leaves.
    #[must_use]
    pub const fn inline_values(&self) -> bool {
        self.inline_values
    }

    /// Borrow the page store.
    #[must_use]
    pub const fn pages(&self) -> &S {
        &self.pages
    }

    /// Borrow the value store.
    #[must_use]
    pub const fn values(&self) -> &D {
        &self.values
    }

    /// Whether `close` has completed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Look up a value by key.
    pub fn get(&mut self, key: &K::Item) -> Result<Option<V::Item>, BTreeError> {
        self.check_open()?;
        let key = self.key_codec.encode_to_vec(key);
        let descent = self.descend(|node| node.find_child_index(&key))?;

        match descent.leaf.get(&key) {
            Some(value) => Ok(Some(self.load_value(value)?)),
            None => Ok(None),
        }
    }

    /// Whether the tree holds `key`.
    pub fn contains_key(&mut self, key: &K::Item) -> Result<bool, BTreeError> {
        self.check_open()?;
        let key = self.key_codec.encode_to_vec(key);
        let descent = self.descend(|node| node.find_child_index(&key))?;
        Ok(descent.leaf.find_index(&key).is_ok())
    }

    /// Insert a key-value pair, replacing the value of an existing key.
    pub fn put(&mut self, key: &K::Item, value: &V::Item) -> Result<(), BTreeError> {
        self.check_open()?;
        let key = self.encode_key(key)?;
        let value = self.store_value(value)?;

        let Descent {
            leaf_id,
            mut leaf,
            path,
        } = self.descend(|node| node.find_child_index(&key))?;
        let inserted = leaf.insert(key, value).is_none();

        if self.fits(leaf.entries.len(), leaf.encoded_size(&self.layout)) {
            self.write_node(leaf_id, &Node::Leaf(leaf))?;
        } else {
            let (separator, right) = leaf.split(&self.layout);
            let right_id = self.pages.allocate_page()?;
            leaf.next_leaf = right_id;

            tracing::debug!(
                left = leaf_id,
                right = right_id,
                left_entries = leaf.entries.len(),
                right_entries = right.entries.len(),
                "split leaf"
            );
            self.write_node(right_id, &Node::Leaf(right))?;
            self.write_node(leaf_id, &Node::Leaf(leaf))?;
            self.insert_into_parents(path, leaf_id, separator, right_id)?;
        }

        if inserted {
            self.meta.entry_count += 1;
        }
        Ok(())
    }

    /// Iterate over all entries in key order.
    ///
    /// Each call starts a fresh traversal from the root.
    pub const fn iter(&mut self) -> Iter<'_, K, V, S, D> {
        Iter {
            tree: self,
            state: IterState::Seek(None),
        }
    }

    /// Iterate in key order starting at the first key `>= start`.
    pub fn range_from(&mut self, start: &K::Item) -> Iter<'_, K, V, S, D> {
        let start = self.key_codec.encode_to_vec(start);
        Iter {
            tree: self,
            state: IterState::Seek(Some(start)),
        }
    }

    /// The entry with the smallest key.
    pub fn first(&mut self) -> Result<Option<Entry<K, V>>, BTreeError> {
        self.iter().next_entry()
    }

    /// The entry with the largest key.
    pub fn last(&mut self) -> Result<Option<Entry<K, V>>, BTreeError> {
        self.check_open()?;
        let descent = self.descend(|node| node.children.len() - 1)?;

        match descent.leaf.entries.last() {
            Some(entry) => Ok(Some(self.decode_entry(&entry.key, &entry.value)?)),
            None => Ok(None),
        }
    }

    /// Persist metadata and all buffered pages without closing.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        self.check_open()?;
        self.values.flush()?;
        self.write_meta()?;
        self.pages.flush()?;
        Ok(())
    }

    /// Persist everything and release both stores.
    ///
    /// Calling `close` again is a no-op. Every other operation fails with
    /// `StorageError::Closed` afterwards.
    pub fn close(&mut self) -> Result<(), BTreeError> {
        if self.closed {
            return Ok(());
        }

        self.values.close()?;
        self.write_meta()?;
        self.pages.close()?;
        self.closed = true;

        tracing::info!(
            entries = self.meta.entry_count,
            height = self.meta.height,
            "closed tree"
        );
        Ok(())
    }

    /// Walk the whole tree and verify its structural invariants:
    /// - keys strictly ascending within every node and inside the bounds
    ///   set by the parent's separators
    /// - internal nodes have one more child than keys
    /// - no node exceeds the node capacity
    /// - every leaf sits at depth `height`
    /// - the leaf chain links the leaves left to right
    /// - the leaf entries add up to `len()`
    pub fn check_invariants(&mut self) -> Result<TreeStats, BTreeError> {
        self.check_open()?;

        let height = self.meta.height;
        let mut stats = TreeStats {
            height,
            ..TreeStats::default()
        };
        let mut leaves: Vec<(PageId, PageId)> = Vec::new();
        let mut stack: Vec<PendingNode> = vec![(self.meta.root, 1, None, None)];

        while let Some((page_id, depth, lower, upper)) = stack.pop() {
            if depth > height {
                return Err(violation(format!(
                    "page {page_id} lies below the recorded height {height}"
                )));
            }

            let node = self.read_node(page_id)?;
            if node.key_count() > self.capacity {
                return Err(violation(format!(
                    "page {page_id} holds {} keys, capacity is {}",
                    node.key_count(),
                    self.capacity
                )));
            }

            let keys: Vec<&[u8]> = match &node {
                Node::Internal(n) => n.keys.iter().map(Vec::as_slice).collect(),
                Node::Leaf(l) => l.entries.iter().map(|e| e.key.as_slice()).collect(),
            };
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return Err(violation(format!("keys of page {page_id} are not ascending")));
            }
            let below_lower = matches!((keys.first(), &lower), (Some(k), Some(l)) if *k < l.as_slice());
            let above_upper = matches!((keys.last(), &upper), (Some(k), Some(u)) if *k >= u.as_slice());
            if below_lower || above_upper {
                return Err(violation(format!(
                    "keys of page {page_id} fall outside the parent's separators"
                )));
            }

            match node {
                Node::Internal(n) => {
                    if n.keys.is_empty() || n.children.len() != n.keys.len() + 1 {
                        return Err(violation(format!(
                            "internal page {page_id} has {} keys and {} children",
                            n.keys.len(),
                            n.children.len()
                        )));
                    }
                    stats.internal_nodes += 1;

                    // Reverse push so children pop left to right.
                    for i in (0..n.children.len()).rev() {
                        let child_lower = if i == 0 {
                            lower.clone()
                        } else {
                            Some(n.keys[i - 1].clone())
                        };
                        let child_upper = n.keys.get(i).cloned().or_else(|| upper.clone());
                        stack.push((n.children[i], depth + 1, child_lower, child_upper));
                    }
                }
                Node::Leaf(l) => {
                    if depth != height {
                        return Err(violation(format!(
                            "leaf {page_id} at depth {depth}, expected {height}"
                        )));
                    }
                    if l.entries.is_empty() && page_id != self.meta.root {
                        return Err(violation(format!("non-root leaf {page_id} is empty")));
                    }
                    stats.leaf_nodes += 1;
                    stats.entries += l.entries.len() as u64;
                    leaves.push((page_id, l.next_leaf));
                }
            }
        }

        for pair in leaves.windows(2) {
            let ((left, next), (right, _)) = (pair[0], pair[1]);
            if next != right {
                return Err(violation(format!(
                    "leaf {left} links to {next}, expected {right}"
                )));
            }
        }
        if let Some(&(last, next)) = leaves.last().filter(|(_, next)| *next != NO_NEXT_LEAF) {
            return Err(violation(format!(
                "last leaf {last} links to {next}, expected none"
            )));
        }

        if stats.entries != self.meta.entry_count {
            return Err(violation(format!(
                "leaves hold {} entries, metadata records {}",
                stats.entries, self.meta.entry_count
            )));
        }

        Ok(stats)
    }

    const fn check_open(&self) -> Result<(), BTreeError> {
        if self.closed {
            Err(BTreeError::Storage(StorageError::Closed))
        } else {
            Ok(())
        }
    }

    const fn fits(&self, key_count: usize, encoded_size: usize) -> bool {
        key_count <= self.capacity && encoded_size <= self.layout.data_space()
    }

    /// Encode a key and check that it can be stored in a node.
    fn encode_key(&self, key: &K::Item) -> Result<Vec<u8>, BTreeError> {
        let bytes = self.key_codec.encode_to_vec(key);
        match self.layout.key_width() {
            Some(width) if bytes.len() != width => Err(BTreeError::Codec(CodecError::WrongLength {
                expected: width,
                actual: bytes.len(),
            })),
            Some(_) => Ok(bytes),
            None => {
                let max = max_variable_key_len(&self.layout, self.ref_size()).unwrap_or(0);
                if bytes.len() > max {
                    Err(BTreeError::Capacity(CapacityError::KeyTooLarge {
                        len: bytes.len(),
                        max,
                    }))
                } else {
                    Ok(bytes)
                }
            }
        }
    }

    fn ref_size(&self) -> usize {
        value_ref_size(self.inline_values, self.value_codec.fixed_size())
    }

    /// Encode a value and place it inline or in the value store.
    fn store_value(&mut self, value: &V::Item) -> Result<ValueRef, BTreeError> {
        let bytes = self.value_codec.encode_to_vec(value);
        if let Some(width) = self.value_codec.fixed_size()
            && bytes.len() != width
        {
            return Err(BTreeError::Codec(CodecError::WrongLength {
                expected: width,
                actual: bytes.len(),
            }));
        }
        if self.inline_values {
            Ok(ValueRef::Inline(bytes))
        } else {
            Ok(ValueRef::External(self.values.append(&bytes)?))
        }
    }

    fn load_value(&mut self, value: &ValueRef) -> Result<V::Item, BTreeError> {
        match value {
            ValueRef::Inline(bytes) => Ok(self.value_codec.decode(bytes)?),
            ValueRef::External(record) => {
                let bytes = self.values.read(*record)?;
                Ok(self.value_codec.decode(&bytes)?)
            }
        }
    }

    fn decode_entry(
        &mut self,
        key: &[u8],
        value: &ValueRef,
    ) -> Result<Entry<K, V>, BTreeError> {
        let key = self.key_codec.decode(key)?;
        let value = self.load_value(value)?;
        Ok((key, value))
    }

    fn read_node(&mut self, page_id: PageId) -> Result<Node, BTreeError> {
        if page_id == META_PAGE_ID {
            return Err(BTreeError::Node(NodeError::WrongPageType(PageType::Meta)));
        }
        let page = self.pages.read_page(page_id)?;
        Ok(Node::from_page(&page, &self.layout)?)
    }

    fn read_leaf(&mut self, page_id: PageId) -> Result<LeafNode, BTreeError> {
        match self.read_node(page_id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(BTreeError::Node(NodeError::WrongPageType(
                PageType::Internal,
            ))),
        }
    }

    fn write_node(&mut self, page_id: PageId, node: &Node) -> Result<(), BTreeError> {
        let required = node.encoded_size(&self.layout);
        let available = self.layout.data_space();
        if required > available {
            return Err(BTreeError::Capacity(CapacityError::NodeOverflow {
                page_id,
                required,
                available,
            }));
        }
        self.pages.write_page(page_id, &node.to_page(&self.layout))?;
        Ok(())
    }

    fn write_meta(&mut self) -> Result<(), BTreeError> {
        self.pages.write_page(META_PAGE_ID, &self.meta.to_page())?;
        Ok(())
    }

    /// Descend from the root to a leaf, choosing the child index with `choose`.
    fn descend(
        &mut self,
        mut choose: impl FnMut(&InternalNode) -> usize,
    ) -> Result<Descent, BTreeError> {
        let mut path = Vec::with_capacity(self.meta.height as usize);
        let mut page_id = self.meta.root;

        loop {
            match self.read_node(page_id)? {
                Node::Leaf(leaf) => {
                    return Ok(Descent {
                        leaf_id: page_id,
                        leaf,
                        path,
                    });
                }
                Node::Internal(node) => {
                    if path.len() + 1 >= self.meta.height as usize {
                        return Err(violation(format!(
                            "internal page {page_id} found at leaf depth {}",
                            self.meta.height
                        )));
                    }
                    let child = node.children[choose(&node)];
                    path.push((page_id, node));
                    page_id = child;
                }
            }
        }
    }

    /// Insert a promoted separator into the nodes on `path`, splitting them
    /// bottom-up as needed. Grows a new root if the old root splits.
    fn insert_into_parents(
        &mut self,
        mut path: Vec<PathEntry>,
        mut left_id: PageId,
        mut separator: Vec<u8>,
        mut right_id: PageId,
    ) -> Result<(), BTreeError> {
        while let Some((parent_id, mut parent)) = path.pop() {
            parent.insert(separator, right_id);
            if self.fits(parent.keys.len(), parent.encoded_size(&self.layout)) {
                return self.write_node(parent_id, &Node::Internal(parent));
            }

            let (median, right) = parent.split(&self.layout);
            let new_id = self.pages.allocate_page()?;
            tracing::debug!(left = parent_id, right = new_id, "split internal node");

            self.write_node(new_id, &Node::Internal(right))?;
            self.write_node(parent_id, &Node::Internal(parent))?;

            left_id = parent_id;
            separator = median;
            right_id = new_id;
        }

        let root = InternalNode::with_children(left_id, separator, right_id);
        let root_id = self.pages.allocate_page()?;
        self.write_node(root_id, &Node::Internal(root))?;
        self.meta.root = root_id;
        self.meta.height += 1;

        tracing::debug!(root = root_id, height = self.meta.height, "grew new root");
        Ok(())
    }
}

impl<K: KeyCodec, V: Codec> FileTree<K, V> {
    /// Create a tree in `config.directory`, which is created if missing.
    ///
    /// Fails if either index file already exists.
    pub fn create_files(
        config: &IndexConfig,
        key_codec: K,
        value_codec: V,
    ) -> Result<Self, BTreeError> {
        config.validate()?;
        std::fs::create_dir_all(&config.directory).map_err(StorageError::from)?;

        let pages = PageFile::create(&config.directory_file(), config.page_size)?;
        let values = ValueFile::create(&config.value_file())?;
        Self::create(
            buffered(pages, config.cache_pages),
            values,
            key_codec,
            value_codec,
            config.node_capacity,
        )
    }

    /// Open the tree stored in `config.directory`.
    ///
    /// `config.node_capacity` is ignored; the stored capacity applies.
    pub fn open_files(
        config: &IndexConfig,
        key_codec: K,
        value_codec: V,
    ) -> Result<Self, BTreeError> {
        config.validate()?;

        let pages = PageFile::open(&config.directory_file(), config.page_size)?;
        let values = ValueFile::open(&config.value_file())?;
        let tree = Self::open(
            buffered(pages, config.cache_pages),
            values,
            key_codec,
            value_codec,
        )?;

        if tree.node_capacity() != config.node_capacity {
            tracing::debug!(
                stored = tree.node_capacity(),
                configured = config.node_capacity,
                "using stored node capacity"
            );
        }
        Ok(tree)
    }

    /// Open the tree in `config.directory`, creating it if its files do not
    /// exist yet.
    pub fn open_or_create_files(
        config: &IndexConfig,
        key_codec: K,
        value_codec: V,
    ) -> Result<Self, BTreeError> {
        if config.files_exist() {
            Self::open_files(config, key_codec, value_codec)
        } else {
            Self::create_files(config, key_codec, value_codec)
        }
    }
}

impl<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> Drop for BPlusTree<K, V, S, D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close tree on drop: {e}");
        }
    }
}

fn buffered(pages: PageFile, cache_pages: Option<usize>) -> BufferedPageStore<PageFile> {
    match cache_pages {
        Some(capacity) => BufferedPageStore::new(pages, capacity),
        None => BufferedPageStore::unbounded(pages),
    }
}

const fn width_field(width: Option<usize>) -> u32 {
    match width {
        Some(w) => w as u32,
        None => 0,
    }
}

const fn value_ref_size(inline: bool, value_width: Option<usize>) -> usize {
    match (inline, value_width) {
        (true, Some(width)) => 1 + LEN_PREFIX_SIZE + width,
        _ => EXTERNAL_REF_SIZE,
    }
}

/// Longest variable-size key whose leaf and internal entries both stay
/// within `layout.max_entry_size()`.
fn max_variable_key_len(layout: &NodeLayout, ref_size: usize) -> Option<usize> {
    layout
        .max_entry_size()
        .checked_sub(LEN_PREFIX_SIZE + ref_size.max(CHILD_SIZE))
        .filter(|&max| max > 0)
}

/// Validate the tree parameters and derive the node layout.
///
/// Returns the layout and whether values are stored inline.
fn plan_layout<K: Codec, V: Codec>(
    page_size: usize,
    node_capacity: usize,
    key_codec: &K,
    value_codec: &V,
) -> Result<(NodeLayout, bool), BTreeError> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(BTreeError::InvalidConfig(format!(
            "page size {page_size} is outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"
        )));
    }
    if !(MIN_NODE_CAPACITY..=usize::from(u16::MAX)).contains(&node_capacity) {
        return Err(BTreeError::InvalidConfig(format!(
            "node capacity {node_capacity} is outside {MIN_NODE_CAPACITY}..={}",
            u16::MAX
        )));
    }

    // Width 0 is stored as the variable-size marker.
    if key_codec.fixed_size() == Some(0) || value_codec.fixed_size() == Some(0) {
        return Err(BTreeError::InvalidConfig(
            "codecs must not have a fixed width of 0".to_string(),
        ));
    }

    let value_width = value_codec.fixed_size();
    let inline_values = value_width.is_some_and(|w| w <= MAX_INLINE_VALUE_SIZE);
    let ref_size = value_ref_size(inline_values, value_width);
    let layout = NodeLayout::new(page_size, key_codec.fixed_size());

    match key_codec.fixed_size() {
        Some(key_width) => {
            // A full node of either kind must fit one page.
            let leaf = node_capacity * (key_width + ref_size);
            let internal = CHILD_SIZE + node_capacity * (key_width + CHILD_SIZE);
            let required = leaf.max(internal);
            if required > layout.data_space() {
                return Err(BTreeError::Capacity(CapacityError::NodeTooSmall {
                    node_capacity,
                    required,
                    available: layout.data_space(),
                }));
            }
        }
        None => {
            if max_variable_key_len(&layout, ref_size).is_none() {
                return Err(BTreeError::Capacity(CapacityError::NodeTooSmall {
                    node_capacity,
                    required: LEN_PREFIX_SIZE + ref_size.max(CHILD_SIZE) + 1,
                    available: layout.max_entry_size(),
                }));
            }
        }
    }

    Ok((layout, inline_values))
}

const fn violation(message: String) -> BTreeError {
    BTreeError::InvariantViolation(message)
}

enum IterState {
    /// Not positioned yet; descend to the first key `>=` the given key, or
    /// to the leftmost leaf.
    Seek(Option<Vec<u8>>),
    /// Positioned inside a loaded leaf.
    Leaf {
        entries: Vec<LeafEntry>,
        pos: usize,
        next_leaf: PageId,
    },
    Done,
}

/// Iterator over tree entries in key order.
///
/// Values are loaded lazily, one entry at a time. After an error the
/// iterator is exhausted.
pub struct Iter<'a, K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> {
    tree: &'a mut BPlusTree<K, V, S, D>,
    state: IterState,
}

impl<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> Iter<'_, K, V, S, D> {
    /// Get the next entry.
    pub fn next_entry(&mut self) -> Result<Option<Entry<K, V>>, BTreeError> {
        loop {
            match &mut self.state {
                IterState::Done => return Ok(None),
                IterState::Seek(start) => {
                    let start = start.take();
                    self.tree.check_open()?;
                    let descent = match &start {
                        Some(key) => self.tree.descend(|node| node.find_child_index(key))?,
                        None => self.tree.descend(|_| 0)?,
                    };
                    let pos = start
                        .as_deref()
                        .map_or(0, |key| descent.leaf.find_index(key).unwrap_or_else(|i| i));
                    self.state = IterState::Leaf {
                        next_leaf: descent.leaf.next_leaf,
                        entries: descent.leaf.entries,
                        pos,
                    };
                }
                IterState::Leaf {
                    entries,
                    pos,
                    next_leaf,
                } => {
                    if let Some(entry) = entries.get(*pos) {
                        *pos += 1;
                        let entry = entry.clone();
                        return self.tree.decode_entry(&entry.key, &entry.value).map(Some);
                    }

                    if *next_leaf == NO_NEXT_LEAF {
                        self.state = IterState::Done;
                        continue;
                    }
                    let leaf = self.tree.read_leaf(*next_leaf)?;
                    self.state = IterState::Leaf {
                        next_leaf: leaf.next_leaf,
                        entries: leaf.entries,
                        pos: 0,
                    };
                }
            }
        }
    }
}

impl<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore> Iterator for Iter<'_, K, V, S, D> {
    type Item = Result<Entry<K, V>, BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.state = IterState::Done;
                Some(Err(e))
            }
        }
    }
}

/// An entry or node that cannot fit a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// `node_capacity` entries of the codecs' widths do not fit one page.
    NodeTooSmall {
        node_capacity: usize,
        required: usize,
        available: usize,
    },
    /// A variable-size key exceeds the per-node key limit.
    KeyTooLarge { len: usize, max: usize },
    /// A node outgrew its page even after splitting.
    NodeOverflow {
        page_id: PageId,
        required: usize,
        available: usize,
    },
}

impl std::fmt::Display for CapacityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeTooSmall {
                node_capacity,
                required,
                available,
            } => write!(
                f,
                "node capacity {node_capacity} needs {required} bytes per node, pages hold {available}"
            ),
            Self::KeyTooLarge { len, max } => {
                write!(f, "key of {len} bytes exceeds the limit of {max} bytes")
            }
            Self::NodeOverflow {
                page_id,
                required,
                available,
            } => write!(
                f,
                "node for page {page_id} needs {required} bytes, pages hold {available}"
            ),
        }
    }
}

impl std::error::Error for CapacityError {}

/// Errors that can occur during B+ tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page or value store error.
    Storage(StorageError),
    /// Node page could not be decoded.
    Node(NodeError),
    /// Key or value bytes could not be decoded.
    Codec(CodecError),
    /// Metadata page is invalid or does not match the codecs.
    Meta(MetaError),
    /// An entry or node cannot fit a page.
    Capacity(CapacityError),
    /// Invalid construction parameters.
    InvalidConfig(String),
    /// The stored structure is inconsistent.
    InvariantViolation(String),
}

impl BTreeError {
    /// Whether the error indicates damaged on-disk data.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Node(_) | Self::Codec(_) | Self::Meta(_) | Self::InvariantViolation(_)
        )
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Meta(e) => write!(f, "metadata error: {e}"),
            Self::Capacity(e) => write!(f, "capacity error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Meta(e) => Some(e),
            Self::Capacity(e) => Some(e),
            Self::InvalidConfig(_) | Self::InvariantViolation(_) => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<CodecError> for BTreeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<MetaError> for BTreeError {
    fn from(e: MetaError) -> Self {
        Self::Meta(e)
    }
}

impl From<ConfigError> for BTreeError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ArrayCodec, StringCodec, U32Codec, U64Codec};
    use crate::storage::memory::{FaultConfig, MemoryPageStore, MemoryValueStore};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    type MemTree<K, V> = BPlusTree<K, V, MemoryPageStore, MemoryValueStore>;

    fn memory_tree<K: KeyCodec, V: Codec>(
        page_size: usize,
        capacity: usize,
        key_codec: K,
        value_codec: V,
    ) -> MemTree<K, V> {
        BPlusTree::create(
            MemoryPageStore::new(page_size),
            MemoryValueStore::new(),
            key_codec,
            value_codec,
            capacity,
        )
        .expect("create tree")
    }

    fn collect<K: KeyCodec, V: Codec, S: PageStore, D: ValueStore>(
        tree: &mut BPlusTree<K, V, S, D>,
    ) -> Vec<Entry<K, V>> {
        tree.iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("iterate")
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = memory_tree(512, 4, U32Codec, StringCodec);

        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.get(&1).expect("get"), None);
        assert!(tree.first().expect("first").is_none());
        assert!(tree.last().expect("last").is_none());
        assert!(collect(&mut tree).is_empty());

        let stats = tree.check_invariants().expect("valid tree");
        assert_eq!(stats.leaf_nodes, 1);
        assert_eq!(stats.internal_nodes, 0);
    }

    #[test]
    fn test_basic_operations() {
        let mut tree = memory_tree(512, 4, U32Codec, StringCodec);

        tree.put(&10, &"ten".to_string()).expect("put");
        tree.put(&5, &"five".to_string()).expect("put");
        tree.put(&20, &String::new()).expect("put");

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(&10).expect("get"), Some("ten".to_string()));
        assert_eq!(tree.get(&5).expect("get"), Some("five".to_string()));
        assert_eq!(tree.get(&20).expect("get"), Some(String::new()));
        assert_eq!(tree.get(&7).expect("get"), None);
        assert!(tree.contains_key(&5).expect("contains"));
        assert!(!tree.contains_key(&6).expect("contains"));
        assert!(!tree.inline_values());
    }

    #[test]
    fn test_overwrite_keeps_size() {
        let mut tree = memory_tree(512, 4, U32Codec, StringCodec);

        tree.put(&1, &"first".to_string()).expect("put");
        tree.put(&1, &"second".to_string()).expect("put");

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&1).expect("get"), Some("second".to_string()));
        assert_eq!(collect(&mut tree), vec![(1, "second".to_string())]);
    }

    #[test]
    fn test_fixed_values_are_inline() {
        let mut tree = memory_tree(512, 8, U32Codec, U64Codec);
        assert!(tree.inline_values());

        for i in 0..100u32 {
            tree.put(&i, &(u64::from(i) * 3)).expect("put");
        }

        assert!(tree.values().is_empty());
        assert_eq!(tree.get(&33).expect("get"), Some(99));
        tree.check_invariants().expect("valid tree");
    }

    #[test]
    fn test_splits_in_every_insert_order() {
        let ascending: Vec<u32> = (0..500).collect();
        let descending: Vec<u32> = ascending.iter().rev().copied().collect();
        let mut shuffled = ascending.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(7));

        for keys in [ascending, descending, shuffled] {
            let mut tree = memory_tree(512, MIN_NODE_CAPACITY, U32Codec, U64Codec);
            for k in keys {
                tree.put(&k, &u64::from(k)).expect("put");
            }

            let stats = tree.check_invariants().expect("valid tree");
            assert_eq!(stats.entries, 500);
            assert!(stats.height >= 4);
            assert_eq!(stats.height, tree.height());

            let entries = collect(&mut tree);
            let expected: Vec<(u32, u64)> = (0..500).map(|k| (k, u64::from(k))).collect();
            assert_eq!(entries, expected);
        }
    }

    #[test]
    fn test_variable_keys_split_on_bytes() {
        // Large capacity, so every split is driven by page space.
        let mut tree = memory_tree(512, 1000, StringCodec, U32Codec);
        let mut rng = StdRng::seed_from_u64(42);
        let mut expected = std::collections::BTreeMap::new();

        for i in 0..400u32 {
            let len = rng.random_range(0..40);
            let key: String = (0..len)
                .map(|_| char::from(rng.random_range(b'a'..=b'z')))
                .collect();
            tree.put(&key, &i).expect("put");
            expected.insert(key, i);
        }

        let stats = tree.check_invariants().expect("valid tree");
        assert!(stats.height > 1);
        assert_eq!(tree.len(), expected.len() as u64);
        assert_eq!(collect(&mut tree), expected.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_range_from() {
        let mut tree = memory_tree(512, 4, U32Codec, U32Codec);
        for i in (0..100).map(|i| i * 2) {
            tree.put(&i, &i).expect("put");
        }

        let from_51: Vec<u32> = tree
            .range_from(&51)
            .map(|e| e.expect("entry").0)
            .take(3)
            .collect();
        assert_eq!(from_51, vec![52, 54, 56]);

        let from_exact: Vec<u32> = tree
            .range_from(&100)
            .map(|e| e.expect("entry").0)
            .take(2)
            .collect();
        assert_eq!(from_exact, vec![100, 102]);

        assert_eq!(tree.range_from(&1000).count(), 0);
        assert_eq!(tree.range_from(&0).count(), 100);
    }

    #[test]
    fn test_first_and_last() {
        let mut tree = memory_tree(512, 3, U32Codec, StringCodec);
        for i in [50u32, 10, 90, 30, 70] {
            tree.put(&i, &format!("v{i}")).expect("put");
        }

        assert_eq!(tree.first().expect("first"), Some((10, "v10".to_string())));
        assert_eq!(tree.last().expect("last"), Some((90, "v90".to_string())));
    }

    #[test]
    fn test_invalid_capacity() {
        let result = BPlusTree::create(
            MemoryPageStore::new(512),
            MemoryValueStore::new(),
            U32Codec,
            U32Codec,
            2,
        );
        assert!(matches!(result, Err(BTreeError::InvalidConfig(_))));
    }

    #[test]
    fn test_fixed_keys_too_wide_for_page() {
        let result = BPlusTree::create(
            MemoryPageStore::new(4096),
            MemoryValueStore::new(),
            ArrayCodec::<200>::new(),
            StringCodec,
            50,
        );
        assert!(matches!(
            result,
            Err(BTreeError::Capacity(CapacityError::NodeTooSmall {
                node_capacity: 50,
                ..
            }))
        ));
    }

    #[test]
    fn test_variable_key_too_large() {
        let mut tree = memory_tree(256, 8, StringCodec, StringCodec);

        let err = tree
            .put(&"k".repeat(200), &"v".to_string())
            .expect_err("key too large");
        assert!(matches!(
            err,
            BTreeError::Capacity(CapacityError::KeyTooLarge { len: 200, .. })
        ));
        assert!(tree.is_empty());

        tree.put(&"small".to_string(), &"v".to_string()).expect("put");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_zero_width_codecs_rejected() {
        let zero_keys = BPlusTree::create(
            MemoryPageStore::new(512),
            MemoryValueStore::new(),
            ArrayCodec::<0>::new(),
            StringCodec,
            4,
        );
        assert!(matches!(zero_keys, Err(BTreeError::InvalidConfig(_))));

        let zero_values = BPlusTree::create(
            MemoryPageStore::new(512),
            MemoryValueStore::new(),
            U32Codec,
            ArrayCodec::<0>::new(),
            4,
        );
        assert!(matches!(zero_values, Err(BTreeError::InvalidConfig(_))));
    }

    /// Declares 4 bytes but writes 8.
    struct WideU32Codec;

    impl Codec for WideU32Codec {
        type Item = u32;

        fn encode(&self, item: &u32, out: &mut Vec<u8>) {
            out.extend_from_slice(&u64::from(*item).to_be_bytes());
        }

        fn decode(&self, bytes: &[u8]) -> Result<u32, CodecError> {
            U32Codec.decode(bytes)
        }

        fn fixed_size(&self) -> Option<usize> {
            Some(4)
        }
    }

    #[test]
    fn test_value_wider_than_declared() {
        let mut tree = memory_tree(512, 4, U32Codec, WideU32Codec);

        let err = tree.put(&1, &7).expect_err("value has the wrong width");
        assert!(matches!(
            err,
            BTreeError::Codec(CodecError::WrongLength {
                expected: 4,
                actual: 8
            })
        ));
        assert!(tree.is_empty());
        assert_eq!(tree.get(&1).expect("get"), None);
    }

    #[test]
    fn test_create_requires_empty_store() {
        let mut pages = MemoryPageStore::new(512);
        pages.allocate_page().expect("allocate");

        let result = BPlusTree::create(pages, MemoryValueStore::new(), U32Codec, U32Codec, 4);
        assert!(matches!(result, Err(BTreeError::InvalidConfig(_))));
    }

    #[test]
    fn test_open_empty_store_fails() {
        let result = BPlusTree::open(
            MemoryPageStore::new(512),
            MemoryValueStore::new(),
            U32Codec,
            U32Codec,
        );
        assert!(matches!(result, Err(BTreeError::InvalidConfig(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut tree = memory_tree(512, 4, U32Codec, StringCodec);
        tree.put(&1, &"one".to_string()).expect("put");

        tree.close().expect("close");
        tree.close().expect("second close is a no-op");
        assert!(tree.is_closed());

        assert!(matches!(
            tree.get(&1),
            Err(BTreeError::Storage(StorageError::Closed))
        ));
        assert!(matches!(
            tree.put(&2, &"two".to_string()),
            Err(BTreeError::Storage(StorageError::Closed))
        ));
        assert!(matches!(
            tree.iter().next(),
            Some(Err(BTreeError::Storage(StorageError::Closed)))
        ));
    }

    #[test]
    fn test_read_fault_propagates() {
        let mut tree = BPlusTree::create(
            MemoryPageStore::with_faults(
                512,
                1,
                FaultConfig {
                    read_error_rate: 1.0,
                    ..FaultConfig::no_faults()
                },
            ),
            MemoryValueStore::new(),
            U32Codec,
            U32Codec,
            4,
        )
        .expect("create only writes");

        assert!(matches!(
            tree.get(&1),
            Err(BTreeError::Storage(StorageError::InjectedFault(_)))
        ));
    }

    #[test]
    fn test_corrupt_page_detected() {
        let mut tree = BPlusTree::create(
            MemoryPageStore::with_faults(512, 3, FaultConfig::always_corrupt()),
            MemoryValueStore::new(),
            U32Codec,
            U32Codec,
            4,
        )
        .expect("create only writes");

        let err = tree.get(&1).expect_err("corrupt root");
        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn test_value_store_faults_propagate() {
        let mut tree = BPlusTree::create(
            MemoryPageStore::new(512),
            MemoryValueStore::with_faults(
                5,
                FaultConfig {
                    read_error_rate: 1.0,
                    ..FaultConfig::no_faults()
                },
            ),
            U32Codec,
            StringCodec,
            4,
        )
        .expect("create tree");

        tree.put(&1, &"stored".to_string()).expect("append succeeds");
        assert!(tree.contains_key(&1).expect("keys need no value read"));
        assert!(matches!(
            tree.get(&1),
            Err(BTreeError::Storage(StorageError::InjectedFault(_)))
        ));

        let mut failing_appends = BPlusTree::create(
            MemoryPageStore::new(512),
            MemoryValueStore::with_faults(5, FaultConfig::always_fail()),
            U32Codec,
            StringCodec,
            4,
        )
        .expect("create tree");
        assert!(failing_appends.put(&1, &"lost".to_string()).is_err());
        assert!(failing_appends.is_empty());
    }

    #[test]
    fn test_error_display_and_source() {
        use std::error::Error;

        let err = BTreeError::from(CodecError::WrongLength {
            expected: 4,
            actual: 2,
        });
        assert!(err.is_corruption());
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "codec error: corrupt data: expected 4 bytes, got 2"
        );

        let err = BTreeError::Capacity(CapacityError::KeyTooLarge { len: 9, max: 4 });
        assert!(!err.is_corruption());
        assert_eq!(
            err.to_string(),
            "capacity error: key of 9 bytes exceeds the limit of 4 bytes"
        );
    }
}
