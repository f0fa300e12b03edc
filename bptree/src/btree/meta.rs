//! Tree metadata page.
//!
//! Page 0 of every directory file holds the metadata needed to reopen the
//! tree: where the root lives, how many entries there are and the layout
//! parameters the file was created with.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{Page, PageError, PageHeader, PageId, PageType};

/// Magic number identifying a tree directory file: "BPTREEIX"
pub const MAGIC: [u8; 8] = *b"BPTREEIX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// The metadata always lives on the first page.
pub const META_PAGE_ID: PageId = 0;

/// Metadata field offsets.
mod offsets {
    pub const MAGIC: usize = 8;
    pub const FORMAT_VERSION: usize = 16;
    pub const PAGE_SIZE: usize = 20;
    pub const NODE_CAPACITY: usize = 24;
    pub const KEY_WIDTH: usize = 28;
    pub const ROOT: usize = 32;
    pub const ENTRY_COUNT: usize = 40;
    pub const HEIGHT: usize = 48;
    pub const VALUE_WIDTH: usize = 52;
}

/// Persistent tree metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TreeMeta {
    /// Page size in bytes.
    pub page_size: u32,
    /// Maximum keys per node.
    pub node_capacity: u32,
    /// Fixed key width, 0 for variable-size keys.
    pub key_width: u32,
    /// Fixed value width, 0 for variable-size values.
    pub value_width: u32,
    /// Root node page.
    pub root: PageId,
    /// Number of distinct keys stored.
    pub entry_count: u64,
    /// Number of levels; a lone root leaf has height 1.
    pub height: u32,
}

impl TreeMeta {
    /// Serialize the metadata to a sealed page of `page_size` bytes.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(self.page_size as usize);
        let header = PageHeader {
            page_type: PageType::Meta,
            flags: 0,
            checksum: 0,
        };

        page.write_bytes(0, &header.to_bytes());
        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u32(offsets::NODE_CAPACITY, self.node_capacity);
        page.write_u32(offsets::KEY_WIDTH, self.key_width);
        page.write_u64(offsets::ROOT, self.root);
        page.write_u64(offsets::ENTRY_COUNT, self.entry_count);
        page.write_u32(offsets::HEIGHT, self.height);
        page.write_u32(offsets::VALUE_WIDTH, self.value_width);
        page.seal();

        page
    }

    /// Deserialize the metadata from a page.
    pub fn from_page(page: &Page) -> Result<Self, MetaError> {
        let magic_slice = page.read_bytes(offsets::MAGIC, 8);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(magic_slice);
        if magic != MAGIC {
            return Err(MetaError::InvalidMagic(magic));
        }

        let header = PageHeader::from_page(page).map_err(MetaError::Page)?;
        if header.page_type != PageType::Meta {
            return Err(MetaError::Page(PageError::InvalidPageType(
                header.page_type as u8,
            )));
        }
        page.verify_checksum().map_err(MetaError::Page)?;

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(MetaError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size as usize != page.size() {
            return Err(MetaError::Mismatch {
                field: "page size",
                stored: u64::from(page_size),
                expected: page.size() as u64,
            });
        }

        Ok(Self {
            page_size,
            node_capacity: page.read_u32(offsets::NODE_CAPACITY),
            key_width: page.read_u32(offsets::KEY_WIDTH),
            value_width: page.read_u32(offsets::VALUE_WIDTH),
            root: page.read_u64(offsets::ROOT),
            entry_count: page.read_u64(offsets::ENTRY_COUNT),
            height: page.read_u32(offsets::HEIGHT),
        })
    }

    /// Check that stored layout parameters match what the caller expects.
    pub fn check_layout(
        &self,
        node_capacity: u32,
        key_width: u32,
        value_width: u32,
    ) -> Result<(), MetaError> {
        let fields = [
            ("node capacity", self.node_capacity, node_capacity),
            ("key width", self.key_width, key_width),
            ("value width", self.value_width, value_width),
        ];
        for (field, stored, expected) in fields {
            if stored != expected {
                return Err(MetaError::Mismatch {
                    field,
                    stored: u64::from(stored),
                    expected: u64::from(expected),
                });
            }
        }
        Ok(())
    }
}

/// Errors that can occur when reading the metadata page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Invalid page header or checksum.
    Page(PageError),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// A stored layout parameter differs from the one supplied at open.
    Mismatch {
        field: &'static str,
        stored: u64,
        expected: u64,
    },
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::Page(e) => write!(f, "invalid metadata page: {e}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::Mismatch {
                field,
                stored,
                expected,
            } => write!(f, "{field} mismatch: file has {stored}, expected {expected}"),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeMeta {
        TreeMeta {
            page_size: 512,
            node_capacity: 50,
            key_width: 4,
            value_width: 0,
            root: 17,
            entry_count: 1234,
            height: 3,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = sample();
        let page = meta.to_page();
        assert_eq!(page.size(), 512);

        let restored = TreeMeta::from_page(&page).expect("should parse");
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_meta_invalid_magic() {
        let page = Page::new(512);
        assert!(matches!(
            TreeMeta::from_page(&page),
            Err(MetaError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_meta_checksum_mismatch() {
        let mut page = sample().to_page();
        page.write_u64(offsets::ROOT, 99);

        assert!(matches!(
            TreeMeta::from_page(&page),
            Err(MetaError::Page(PageError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_meta_unsupported_version() {
        let mut page = sample().to_page();
        page.write_u32(offsets::FORMAT_VERSION, 99);
        page.seal();

        assert_eq!(
            TreeMeta::from_page(&page),
            Err(MetaError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn test_layout_mismatch() {
        let meta = sample();
        assert!(meta.check_layout(50, 4, 0).is_ok());

        let err = meta.check_layout(50, 8, 0).expect_err("key width differs");
        assert_eq!(
            err,
            MetaError::Mismatch {
                field: "key width",
                stored: 4,
                expected: 8
            }
        );
        assert!(err.to_string().contains("key width"));
    }
}
