//! Write-back page cache in front of a `PageStore`.
//!
//! A single insertion touches every page on its root-to-leaf path, often
//! more than once (read, modify, rewrite after a split). The buffered store
//! keeps recently used pages in memory so those touches do not each become
//! a disk round trip.
//!
//! # Design
//!
//! - `read_page` serves from the cache when present, else loads and caches
//! - `write_page` only updates the cache and marks the page dirty
//! - Bounded caches evict the least recently used page, writing it back first
//!   if dirty
//! - `flush` writes every dirty page (ascending page id) and flushes the
//!   inner store; `close` flushes then closes the inner store
//!
//! # Invariants
//!
//! - A cached page is never older than the inner store's copy
//! - `cache.len() <= capacity` for bounded caches after every operation
//! - Dirty pages reach the inner store only on eviction, `flush` or `close`

use std::collections::HashMap;

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{Page, PageId};

/// A cached page plus its bookkeeping.
#[derive(Debug)]
struct CachedPage {
    page: Page,
    dirty: bool,
    /// Logical clock value of the last access, for LRU eviction.
    last_used: u64,
}

/// Counters describing cache behaviour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that had to go to the inner store.
    pub misses: u64,
    /// Pages dropped from a full cache.
    pub evictions: u64,
    /// Dirty pages written to the inner store.
    pub write_backs: u64,
}

/// A page store wrapper with an in-memory write-back cache.
#[derive(Debug)]
pub struct BufferedPageStore<S: PageStore> {
    inner: S,
    cache: HashMap<PageId, CachedPage>,
    /// Maximum number of cached pages; `None` means unbounded.
    capacity: Option<usize>,
    clock: u64,
    closed: bool,
    stats: CacheStats,
}

impl<S: PageStore> BufferedPageStore<S> {
    /// Wrap `inner` with a cache holding at most `capacity` pages.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(inner: S, capacity: usize) -> Self {
        Self::with_capacity(inner, Some(capacity.max(1)))
    }

    /// Wrap `inner` with a cache that never evicts.
    #[must_use]
    pub fn unbounded(inner: S) -> Self {
        Self::with_capacity(inner, None)
    }

    fn with_capacity(inner: S, capacity: Option<usize>) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
            capacity,
            clock: 0,
            closed: false,
            stats: CacheStats::default(),
        }
    }

    /// Cache counters accumulated since construction.
    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of pages currently cached.
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Number of cached pages not yet written to the inner store.
    #[must_use]
    pub fn dirty_pages(&self) -> usize {
        self.cache.values().filter(|c| c.dirty).count()
    }

    /// Borrow the wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    const fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    const fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Make room for one more page if the cache is full.
    fn make_room(&mut self) -> Result<(), StorageError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };

        while self.cache.len() >= capacity {
            let Some(victim) = self
                .cache
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(&id, _)| id)
            else {
                return Ok(());
            };

            if let Some(cached) = self.cache.get(&victim)
                && cached.dirty
            {
                self.inner.write_page(victim, &cached.page)?;
                self.stats.write_backs += 1;
                tracing::trace!(page_id = victim, "wrote back dirty page on eviction");
            }
            self.cache.remove(&victim);
            self.stats.evictions += 1;
        }

        Ok(())
    }

    fn insert(&mut self, page_id: PageId, page: Page, dirty: bool) -> Result<(), StorageError> {
        let last_used = self.tick();
        if let Some(cached) = self.cache.get_mut(&page_id) {
            cached.page = page;
            cached.dirty |= dirty;
            cached.last_used = last_used;
            return Ok(());
        }

        self.make_room()?;
        self.cache.insert(
            page_id,
            CachedPage {
                page,
                dirty,
                last_used,
            },
        );
        Ok(())
    }
}

impl<S: PageStore> PageStore for BufferedPageStore<S> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.check_open()?;

        let now = self.tick();
        if let Some(cached) = self.cache.get_mut(&page_id) {
            cached.last_used = now;
            self.stats.hits += 1;
            return Ok(cached.page.clone());
        }

        self.stats.misses += 1;
        let page = self.inner.read_page(page_id)?;
        self.insert(page_id, page.clone(), false)?;
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.check_open()?;

        let total_pages = self.inner.total_pages();
        if page_id >= total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages,
            });
        }
        if page.size() != self.page_size() {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size(),
                actual: page.size() as u64,
            });
        }

        self.insert(page_id, page.clone(), true)
    }

    fn allocate_page(&mut self) -> Result<PageId, StorageError> {
        self.check_open()?;

        let page_id = self.inner.allocate_page()?;
        let page = Page::new(self.page_size());
        self.insert(page_id, page, false)?;
        Ok(page_id)
    }

    fn total_pages(&self) -> u64 {
        self.inner.total_pages()
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.check_open()?;

        let mut dirty: Vec<PageId> = self
            .cache
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(&id, _)| id)
            .collect();
        dirty.sort_unstable();

        for page_id in &dirty {
            if let Some(cached) = self.cache.get_mut(page_id) {
                self.inner.write_page(*page_id, &cached.page)?;
                cached.dirty = false;
                self.stats.write_backs += 1;
            }
        }

        if !dirty.is_empty() {
            tracing::trace!(pages = dirty.len(), "flushed dirty pages");
        }
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }

        self.flush()?;
        self.inner.close()?;
        self.cache.clear();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::PageFile;
    use crate::storage::memory::MemoryPageStore;
    use tempfile::tempdir;

    const TEST_PAGE_SIZE: usize = 256;

    fn page_with(byte: u8) -> Page {
        let mut page = Page::new(TEST_PAGE_SIZE);
        page.write_u8(0, byte);
        page
    }

    #[test]
    fn test_writes_stay_in_cache_until_flush() {
        let mut store = BufferedPageStore::unbounded(MemoryPageStore::new(TEST_PAGE_SIZE));
        let id = store.allocate_page().expect("allocate");

        store.write_page(id, &page_with(7)).expect("write");
        assert_eq!(store.dirty_pages(), 1);
        assert_eq!(store.inner().stats().writes, 0);

        assert_eq!(store.read_page(id).expect("read").read_u8(0), 7);

        store.flush().expect("flush");
        assert_eq!(store.dirty_pages(), 0);
        assert_eq!(store.inner().stats().writes, 1);
        assert_eq!(store.stats().write_backs, 1);
    }

    #[test]
    fn test_repeated_reads_hit_cache() {
        let mut store = BufferedPageStore::new(MemoryPageStore::new(TEST_PAGE_SIZE), 4);
        let id = store.allocate_page().expect("allocate");

        for _ in 0..5 {
            store.read_page(id).expect("read");
        }

        assert_eq!(store.stats().hits, 5);
        assert_eq!(store.stats().misses, 0);
        assert_eq!(store.inner().stats().reads, 0);
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let mut store = BufferedPageStore::new(MemoryPageStore::new(TEST_PAGE_SIZE), 2);

        let a = store.allocate_page().expect("allocate");
        store.write_page(a, &page_with(1)).expect("write");
        let b = store.allocate_page().expect("allocate");
        store.write_page(b, &page_with(2)).expect("write");

        // Third page forces the least recently used page (a) out.
        let c = store.allocate_page().expect("allocate");
        assert_eq!(store.cached_pages(), 2);
        assert_eq!(store.stats().evictions, 1);
        assert_eq!(store.stats().write_backs, 1);

        // Reading a again is a miss that sees the written-back contents.
        assert_eq!(store.read_page(a).expect("read").read_u8(0), 1);
        assert_eq!(store.stats().misses, 1);

        store.write_page(c, &page_with(3)).expect("write");
        store.flush().expect("flush");
        assert_eq!(store.read_page(b).expect("read").read_u8(0), 2);
        assert_eq!(store.read_page(c).expect("read").read_u8(0), 3);
    }

    #[test]
    fn test_lru_prefers_least_recently_used() {
        let mut store = BufferedPageStore::new(MemoryPageStore::new(TEST_PAGE_SIZE), 2);
        let a = store.allocate_page().expect("allocate");
        let b = store.allocate_page().expect("allocate");

        // Touch a so b becomes the eviction victim.
        store.read_page(a).expect("read");
        store.allocate_page().expect("allocate");

        store.read_page(a).expect("read");
        assert_eq!(store.stats().misses, 0);
        store.read_page(b).expect("read");
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_write_out_of_bounds() {
        let mut store = BufferedPageStore::unbounded(MemoryPageStore::new(TEST_PAGE_SIZE));
        store.allocate_page().expect("allocate");

        let result = store.write_page(5, &page_with(1));
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfBounds {
                page_id: 5,
                total_pages: 1
            })
        ));
        assert!(matches!(
            store.read_page(5),
            Err(StorageError::PageOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_close_flushes_to_disk() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        {
            let file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
            let mut store = BufferedPageStore::new(file, 8);
            let id = store.allocate_page().expect("allocate");
            store.write_page(id, &page_with(0x5A)).expect("write");
            store.close().expect("close");
            store.close().expect("second close is a no-op");
            assert!(store.inner().is_closed());
            assert!(matches!(store.read_page(id), Err(StorageError::Closed)));
        }

        let mut file = PageFile::open(&path, TEST_PAGE_SIZE).expect("open file");
        assert_eq!(file.read_page(0).expect("read").read_u8(0), 0x5A);
    }
}
