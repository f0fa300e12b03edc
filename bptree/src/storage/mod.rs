//! Page and value storage for the index.
//!
//! An index is kept in two files:
//!
//! - The directory file: fixed-size pages. Page 0 holds the tree metadata,
//!   every other page holds one tree node.
//! - The value file: an append-only sequence of value records referenced
//!   from leaf entries by (offset, length).
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::{BufferedPageStore, PageFile, PageStore};
//!
//! // Create a new directory file with 4KB pages behind a 64-page cache
//! let file = PageFile::create(path, 4096)?;
//! let mut pages = BufferedPageStore::new(file, 64);
//!
//! // Allocate a page and write to it
//! let page_id = pages.allocate_page()?;
//! let mut page = Page::new(4096);
//! page.write_bytes(0, b"hello");
//! pages.write_page(page_id, &page)?;
//!
//! // Write back dirty pages and sync to disk
//! pages.flush()?;
//! ```

pub mod buffered;
pub mod file;
pub mod io;
pub mod memory;
pub mod page;
pub mod values;

pub use buffered::{BufferedPageStore, CacheStats};
pub use file::PageFile;
pub use io::{PageStore, StorageError, ValueRecord, ValueStore};
pub use memory::{FaultConfig, MemoryPageStore, MemoryStoreStats, MemoryValueStore};
pub use page::{DEFAULT_PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};
pub use values::ValueFile;
