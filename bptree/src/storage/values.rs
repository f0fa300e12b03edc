//! Value storage file for payloads kept outside the tree pages.
//!
//! Values that are not stored inline in a leaf are appended to a second
//! file. A leaf entry then holds a `ValueRecord` (offset, length) instead of
//! the value bytes.
//!
//! # File Format
//!
//! ```text
//! +----------------+----------------+-----+
//! | Record 0       | Record 1       | ... |
//! | (length0 bytes)| (length1 bytes)|     |
//! +----------------+----------------+-----+
//! ```
//!
//! Records carry no header; their extent lives in the referencing leaf
//! entry. The file is append-only: replacing a value appends a new record
//! and the old bytes become unreachable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{StorageError, ValueRecord, ValueStore};

/// A file-backed append-only value store.
#[derive(Debug)]
pub struct ValueFile {
    /// `None` once the file has been closed.
    file: Option<File>,
    /// Current end of file (next append offset).
    end: u64,
}

impl ValueFile {
    /// Create a new, empty value file.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file: Some(file),
            end: 0,
        })
    }

    /// Open an existing value file; appends continue at its current end.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let end = file.metadata()?.len();

        Ok(Self {
            file: Some(file),
            end,
        })
    }

    fn file_mut(&mut self) -> Result<&mut File, StorageError> {
        self.file.as_mut().ok_or(StorageError::Closed)
    }

    /// Whether the file handle has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl ValueStore for ValueFile {
    fn append(&mut self, bytes: &[u8]) -> Result<ValueRecord, StorageError> {
        let length = u32::try_from(bytes.len()).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("value of {} bytes exceeds record limit", bytes.len()),
            ))
        })?;
        let offset = self.end;

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;

        let record = ValueRecord::new(offset, length);
        self.end = record.end();
        Ok(record)
    }

    fn read(&mut self, record: ValueRecord) -> Result<Vec<u8>, StorageError> {
        if record.end() > self.end {
            return Err(StorageError::ValueOutOfBounds {
                offset: record.offset,
                length: record.length,
                store_len: self.end,
            });
        }

        let mut buf = vec![0u8; record.length as usize];
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(record.offset))?;
        file.read_exact(&mut buf)?;

        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.end
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
    use tempfile::tempdir;

    fn create_test_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        (dir, path)
    }

    #[test]
    fn test_append_and_read() {
        let (_dir, path) = create_test_file();
        let mut values = ValueFile::create(&path).expect("create value file");

        let first = values.append(b"hello").expect("append");
        let second = values.append(&[0xABu8; 2048]).expect("append");

        assert_eq!(first, ValueRecord::new(0, 5));
        assert_eq!(second, ValueRecord::new(5, 2048));
        assert_eq!(values.len(), 2053);

        assert_eq!(values.read(second).expect("read"), vec![0xABu8; 2048]);
        assert_eq!(values.read(first).expect("read"), b"hello");
    }

    #[test]
    fn test_empty_record() {
        let (_dir, path) = create_test_file();
        let mut values = ValueFile::create(&path).expect("create value file");

        let empty = values.append(b"").expect("append");
        assert_eq!(empty.length, 0);
        assert!(values.read(empty).expect("read").is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn test_read_out_of_bounds() {
        let (_dir, path) = create_test_file();
        let mut values = ValueFile::create(&path).expect("create value file");
        values.append(b"abc").expect("append");

        let result = values.read(ValueRecord::new(2, 10));
        assert!(matches!(
            result,
            Err(StorageError::ValueOutOfBounds {
                offset: 2,
                length: 10,
                store_len: 3
            })
        ));
    }

    #[test]
    fn test_reopen_continues_at_end() {
        let (_dir, path) = create_test_file();

        let first = {
            let mut values = ValueFile::create(&path).expect("create value file");
            let record = values.append(b"persisted").expect("append");
            values.close().expect("close");
            record
        };

        let mut values = ValueFile::open(&path).expect("open value file");
        assert_eq!(values.len(), 9);
        let second = values.append(b"more").expect("append");
        assert_eq!(second.offset, 9);

        assert_eq!(values.read(first).expect("read"), b"persisted");
        assert_eq!(values.read(second).expect("read"), b"more");
    }

    #[test]
    fn test_close_releases_handle() {
        let (_dir, path) = create_test_file();
        let mut values = ValueFile::create(&path).expect("create value file");
        let record = values.append(b"x").expect("append");

        values.close().expect("close");
        values.close().expect("second close is a no-op");
        assert!(values.is_closed());
        assert!(matches!(values.read(record), Err(StorageError::Closed)));
    }
}
