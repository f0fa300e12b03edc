//! In-memory stores with optional fault injection.
//!
//! `MemoryPageStore` and `MemoryValueStore` keep everything in process
//! memory. They back throwaway indexes and let tests exercise the error
//! paths of the tree deterministically:
//! - Page-level read/write errors
//! - Byte-level corruption (bit flips) on read
//! - Value-store append/read errors

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{PageStore, StorageError, ValueRecord, ValueStore};
use crate::storage::page::{Page, PageId};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of page corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail every read and write.
    #[must_use]
    pub const fn always_fail() -> Self {
        Self {
            read_error_rate: 1.0,
            write_error_rate: 1.0,
            corruption_rate: 0.0,
        }
    }

    /// Corrupt every page returned by a read.
    #[must_use]
    pub const fn always_corrupt() -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: 0.0,
            corruption_rate: 1.0,
        }
    }
}

/// Statistics about in-memory storage operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of corrupted pages returned.
    pub corrupted_reads: u64,
}

/// Shared fault injector driven by a seeded RNG.
#[derive(Debug)]
struct Faults {
    config: FaultConfig,
    rng: StdRng,
}

impl Faults {
    fn new(seed: u64, config: FaultConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Corrupt a buffer by flipping random bits.
    fn corrupt(&mut self, bytes: &mut [u8]) {
        if bytes.is_empty() {
            return;
        }
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..bytes.len());
            let bit = self.rng.random_range(0..8u8);
            bytes[byte_offset] ^= 1 << bit;
        }
    }
}

/// In-memory page store.
///
/// # Thread Safety
///
/// This implementation is not thread-safe; the tree never shares it.
#[derive(Debug)]
pub struct MemoryPageStore {
    pages: Vec<Page>,
    page_size: usize,
    closed: bool,
    faults: Faults,
    stats: MemoryStoreStats,
}

impl MemoryPageStore {
    /// Create an empty store without fault injection.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self::with_faults(page_size, 0, FaultConfig::no_faults())
    }

    /// Create an empty store with custom fault configuration.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn with_faults(page_size: usize, seed: u64, config: FaultConfig) -> Self {
        Self {
            pages: Vec::new(),
            page_size,
            closed: false,
            faults: Faults::new(seed, config),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    const fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn slot(&self, page_id: PageId) -> Result<usize, StorageError> {
        usize::try_from(page_id)
            .ok()
            .filter(|&idx| idx < self.pages.len())
            .ok_or(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.pages.len() as u64,
            })
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.check_open()?;
        self.stats.reads += 1;
        let idx = self.slot(page_id)?;

        if self.faults.should_inject(self.faults.config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated read error on page {page_id}"
            )));
        }

        let mut page = self.pages[idx].clone();
        if self.faults.should_inject(self.faults.config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.faults.corrupt(page.as_bytes_mut());
        }

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.check_open()?;
        self.stats.writes += 1;
        let idx = self.slot(page_id)?;
        if page.size() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: page.size() as u64,
            });
        }

        if self.faults.should_inject(self.faults.config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated write error on page {page_id}"
            )));
        }

        self.pages[idx].as_bytes_mut().copy_from_slice(page.as_bytes());
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId, StorageError> {
        self.check_open()?;
        let page_id = self.pages.len() as u64;
        self.pages.push(Page::new(self.page_size));
        Ok(page_id)
    }

    fn total_pages(&self) -> u64 {
        self.pages.len() as u64
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.check_open()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

/// In-memory append-only value store.
#[derive(Debug)]
pub struct MemoryValueStore {
    data: Vec<u8>,
    closed: bool,
    faults: Faults,
}

impl MemoryValueStore {
    /// Create an empty store without fault injection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::no_faults())
    }

    /// Create an empty store with custom fault configuration.
    #[must_use]
    pub fn with_faults(seed: u64, config: FaultConfig) -> Self {
        Self {
            data: Vec::new(),
            closed: false,
            faults: Faults::new(seed, config),
        }
    }

    const fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueStore for MemoryValueStore {
    fn append(&mut self, bytes: &[u8]) -> Result<ValueRecord, StorageError> {
        self.check_open()?;
        if self.faults.should_inject(self.faults.config.write_error_rate) {
            return Err(StorageError::InjectedFault(
                "simulated value append error".to_string(),
            ));
        }

        let length = u32::try_from(bytes.len()).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("value of {} bytes exceeds record limit", bytes.len()),
            ))
        })?;
        let record = ValueRecord::new(self.data.len() as u64, length);
        self.data.extend_from_slice(bytes);
        Ok(record)
    }

    fn read(&mut self, record: ValueRecord) -> Result<Vec<u8>, StorageError> {
        self.check_open()?;
        let store_len = self.data.len() as u64;
        if record.end() > store_len {
            return Err(StorageError::ValueOutOfBounds {
                offset: record.offset,
                length: record.length,
                store_len,
            });
        }
        if self.faults.should_inject(self.faults.config.read_error_rate) {
            return Err(StorageError::InjectedFault(
                "simulated value read error".to_string(),
            ));
        }

        #[allow(clippy::cast_possible_truncation)] // bounded by data.len()
        let range = record.offset as usize..record.end() as usize;
        let mut bytes = self.data[range].to_vec();
        if self.faults.should_inject(self.faults.config.corruption_rate) {
            self.faults.corrupt(&mut bytes);
        }
        Ok(bytes)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.check_open()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}
