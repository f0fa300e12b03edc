//! Storage abstraction for the index.
//!
//! This module provides the `PageStore` and `ValueStore` traits that the
//! B+ tree is written against, allowing the tree to run over real files in
//! production and over in-memory stores (optionally with injected faults)
//! in tests.
//!
//! # Design
//!
//! The traits are a minimal abstraction over the core storage operations:
//! - Whole-page read/write and page allocation (directory storage)
//! - Append-only variable-length records (value storage)
//! - Flushing buffered writes and releasing handles

use crate::storage::page::{Page, PageId};

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Value record out of bounds.
    ValueOutOfBounds {
        offset: u64,
        length: u32,
        store_len: u64,
    },
    /// A page buffer or backing file does not match the configured page size.
    PageSizeMismatch { expected: usize, actual: u64 },
    /// The store was already closed.
    Closed,
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl StorageError {
    /// Whether this error reports an access past the allocated region.
    #[must_use]
    pub const fn is_out_of_bounds(&self) -> bool {
        matches!(
            self,
            Self::PageOutOfBounds { .. } | Self::ValueOutOfBounds { .. }
        )
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::ValueOutOfBounds {
                offset,
                length,
                store_len,
            } => write!(
                f,
                "value record at {offset} (length {length}) out of bounds (store length: {store_len})"
            ),
            Self::PageSizeMismatch { expected, actual } => {
                write!(f, "page size mismatch: expected {expected}, got {actual}")
            }
            Self::Closed => write!(f, "store is closed"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over page-based storage operations ("directory storage").
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `allocate_page` extends the store by exactly one zeroed page
/// - page ids at or beyond `total_pages()` are rejected with `PageOutOfBounds`
/// - `flush` makes all previous writes durable
pub trait PageStore {
    /// Size in bytes of every page in this store.
    fn page_size(&self) -> usize;

    /// Read a page from storage.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a page to storage.
    ///
    /// The write may be buffered until `flush` is called.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Allocate a new page at the end of storage and return its id.
    fn allocate_page(&mut self) -> Result<PageId, StorageError>;

    /// Get the total number of pages in storage (the allocation frontier).
    fn total_pages(&self) -> u64;

    /// Make all previous writes durable.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Flush and release the underlying resources.
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Location of a record in a value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRecord {
    /// Byte offset of the record.
    pub offset: u64,
    /// Length of the record in bytes.
    pub length: u32,
}

impl ValueRecord {
    /// Create a new record reference.
    #[must_use]
    pub const fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// Offset one past the last byte of the record.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Append-only storage for variable-length value payloads ("data storage").
///
/// Records are never rewritten or reclaimed; replacing a value appends a new
/// record and abandons the old one.
pub trait ValueStore {
    /// Append a record at the end of the store.
    fn append(&mut self, bytes: &[u8]) -> Result<ValueRecord, StorageError>;

    /// Read a previously appended record.
    fn read(&mut self, record: ValueRecord) -> Result<Vec<u8>, StorageError>;

    /// Current length of the store in bytes.
    fn len(&self) -> u64;

    /// Whether the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make all previous appends durable.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Flush and release the underlying resources.
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::PageOutOfBounds {
            page_id: 10,
            total_pages: 5,
        };
        assert!(e.to_string().contains("page 10"));
        assert!(e.to_string().contains("total pages: 5"));
        assert!(e.is_out_of_bounds());

        let e = StorageError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
        assert!(!e.is_out_of_bounds());
    }

    #[test]
    fn test_value_record_end() {
        let record = ValueRecord::new(100, 28);
        assert_eq!(record.end(), 128);
    }
}
