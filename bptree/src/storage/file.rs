//! Directory file I/O operations.
//!
//! This module handles reading and writing fixed-size pages to the
//! directory storage file. Page `n` lives at byte offset `n * page_size`;
//! the allocation frontier is the file length divided by the page size.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, Page, PageId};

/// A directory file handle with whole-page I/O operations.
#[derive(Debug)]
pub struct PageFile {
    /// `None` once the file has been closed.
    file: Option<File>,
    page_size: usize,
    total_pages: u64,
}

impl PageFile {
    /// Create a new, empty directory file at the given path.
    ///
    /// Returns an error if the file already exists or the page size is out
    /// of range.
    pub fn create(path: &Path, page_size: usize) -> Result<Self, StorageError> {
        check_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file: Some(file),
            page_size,
            total_pages: 0,
        })
    }

    /// Open an existing directory file.
    ///
    /// The file length must be a whole number of pages.
    pub fn open(path: &Path, page_size: usize) -> Result<Self, StorageError> {
        check_page_size(page_size)?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let page_size_u64 = page_size as u64;
        if len % page_size_u64 != 0 {
            return Err(StorageError::PageSizeMismatch {
                expected: page_size,
                actual: len,
            });
        }

        Ok(Self {
            file: Some(file),
            page_size,
            total_pages: len / page_size_u64,
        })
    }

    fn file_mut(&mut self) -> Result<&mut File, StorageError> {
        self.file.as_mut().ok_or(StorageError::Closed)
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), StorageError> {
        if page_id >= self.total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_pages,
            });
        }
        Ok(())
    }

    const fn offset_of(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }

    /// Whether the file handle has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

fn check_page_size(page_size: usize) -> Result<(), StorageError> {
    if (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        Ok(())
    } else {
        Err(StorageError::PageSizeMismatch {
            expected: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            actual: page_size as u64,
        })
    }
}

impl PageStore for PageFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.check_bounds(page_id)?;
        let offset = self.offset_of(page_id);
        let mut page = Page::new(self.page_size);

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(page.as_bytes_mut())?;

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.check_bounds(page_id)?;
        if page.size() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: page.size() as u64,
            });
        }
        let offset = self.offset_of(page_id);

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(page.as_bytes())?;

        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId, StorageError> {
        let new_page = self.total_pages;
        let new_size = self.offset_of(new_page + 1);

        self.file_mut()?.set_len(new_size)?;
        self.total_pages += 1;

        Ok(new_page)
    }

    fn total_pages(&self) -> u64 {
        self.total_pages
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.file_mut()?.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const TEST_PAGE_SIZE: usize = 512;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        {
            let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
            assert_eq!(file.total_pages(), 0);
            file.allocate_page().expect("allocate");
            file.allocate_page().expect("allocate");
            file.close().expect("close");
        }

        {
            let file = PageFile::open(&path, TEST_PAGE_SIZE).expect("open file");
            assert_eq!(file.total_pages(), 2);
            assert_eq!(file.page_size(), TEST_PAGE_SIZE);
        }
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        fs::write(&path, b"existing").expect("write file");

        let result = PageFile::create(&path, TEST_PAGE_SIZE);
        assert!(matches!(
            result,
            Err(StorageError::Io(ref e)) if e.kind() == std::io::ErrorKind::AlreadyExists
        ));
    }

    #[test]
    fn test_open_rejects_partial_page() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        fs::write(&path, vec![0u8; TEST_PAGE_SIZE + 3]).expect("write file");

        let result = PageFile::open(&path, TEST_PAGE_SIZE);
        assert!(matches!(result, Err(StorageError::PageSizeMismatch { .. })));
    }

    #[test]
    fn test_rejects_tiny_page_size() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        let result = PageFile::create(&path, 16);
        assert!(matches!(result, Err(StorageError::PageSizeMismatch { .. })));
    }

    #[test]
    fn test_allocate_and_write_pages() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");

        for expected in 0..5 {
            assert_eq!(file.allocate_page().expect("allocate"), expected);
        }
        assert_eq!(file.total_pages(), 5);
        assert_eq!(
            fs::metadata(&path).expect("metadata").len(),
            5 * TEST_PAGE_SIZE as u64
        );

        let mut page = Page::new(TEST_PAGE_SIZE);
        page.write_bytes(0, b"hello world");
        file.write_page(3, &page).expect("write page");

        let read_page = file.read_page(3).expect("read page");
        assert_eq!(read_page.read_bytes(0, 11), b"hello world");

        // Freshly allocated pages read back as zeros
        let untouched = file.read_page(4).expect("read page");
        assert!(untouched.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
        file.allocate_page().expect("allocate");

        let result = file.read_page(100);
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfBounds {
                page_id: 100,
                total_pages: 1
            })
        ));

        let page = Page::new(TEST_PAGE_SIZE);
        assert!(matches!(
            file.write_page(1, &page),
            Err(StorageError::PageOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_wrong_size_page_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
        file.allocate_page().expect("allocate");

        let page = Page::new(TEST_PAGE_SIZE * 2);
        assert!(matches!(
            file.write_page(0, &page),
            Err(StorageError::PageSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_page_data_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        {
            let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
            file.allocate_page().expect("allocate");
            file.allocate_page().expect("allocate");

            let mut page = Page::new(TEST_PAGE_SIZE);
            page.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
            file.write_page(1, &page).expect("write");
            file.close().expect("close");
        }

        {
            let mut file = PageFile::open(&path, TEST_PAGE_SIZE).expect("open file");
            let page = file.read_page(1).expect("read");
            assert_eq!(page.read_u64(100), 0xDEAD_BEEF_CAFE_BABE);
        }
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dir");

        let mut file = PageFile::create(&path, TEST_PAGE_SIZE).expect("create file");
        file.allocate_page().expect("allocate");
        file.close().expect("close");
        file.close().expect("second close is a no-op");

        assert!(file.is_closed());
        assert!(matches!(file.read_page(0), Err(StorageError::Closed)));
        assert!(matches!(file.allocate_page(), Err(StorageError::Closed)));
    }
}
