//! Index configuration module.
//!
//! This module provides configuration for file-backed indexes, loaded from
//! environment variables or built in code.
//!
//! # Environment Variables
//!
//! - `BPTREE_DIRECTORY`: Directory holding the index files (default: `./data`)
//! - `BPTREE_PAGE_SIZE`: Page size in bytes for new files (default: `4096`)
//! - `BPTREE_NODE_CAPACITY`: Maximum keys per node (default: `50`)
//! - `BPTREE_CACHE_PAGES`: Pages kept by the page cache, `0` for unbounded
//!   (default: `256`)
//!
//! # Invariants
//!
//! After `validate()` succeeds:
//! - `page_size` is within `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`
//! - `node_capacity` is within `MIN_NODE_CAPACITY..=u16::MAX`

use std::path::{Path, PathBuf};

use crate::btree::MIN_NODE_CAPACITY;
use crate::storage::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// File name of the page (directory) file inside `directory`.
pub const DIRECTORY_FILE_NAME: &str = "index.dir";

/// File name of the value file inside `directory`.
pub const VALUE_FILE_NAME: &str = "index.dat";

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory where the index files are stored.
    pub directory: PathBuf,
    /// Page size in bytes. Existing files must have been created with it.
    pub page_size: usize,
    /// Maximum keys per node before a split.
    pub node_capacity: usize,
    /// Page cache size in pages; `None` keeps every page cached.
    pub cache_pages: Option<usize>,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl IndexConfig {
    /// Default index directory.
    pub const DEFAULT_DIRECTORY: &'static str = "./data";
    /// Default node capacity.
    pub const DEFAULT_NODE_CAPACITY: usize = 50;
    /// Default page cache size.
    pub const DEFAULT_CACHE_PAGES: usize = 256;

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number, or if
    /// the resulting configuration fails `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let directory = lookup("BPTREE_DIRECTORY")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DIRECTORY), PathBuf::from);
        let page_size = parse_usize(&lookup, "BPTREE_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let node_capacity =
            parse_usize(&lookup, "BPTREE_NODE_CAPACITY", Self::DEFAULT_NODE_CAPACITY)?;
        let cache_pages = match parse_usize(&lookup, "BPTREE_CACHE_PAGES", Self::DEFAULT_CACHE_PAGES)? {
            0 => None,
            pages => Some(pages),
        };

        let config = Self {
            directory,
            page_size,
            node_capacity,
            cache_pages,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!(
                    "{} is outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                    self.page_size
                ),
            });
        }
        if !(MIN_NODE_CAPACITY..=usize::from(u16::MAX)).contains(&self.node_capacity) {
            return Err(ConfigError::InvalidValue {
                name: "node_capacity".to_string(),
                message: format!(
                    "{} is outside {MIN_NODE_CAPACITY}..={}",
                    self.node_capacity,
                    u16::MAX
                ),
            });
        }
        Ok(())
    }

    /// Same settings with the index files placed in `directory`.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Path of the page file.
    #[must_use]
    pub fn directory_file(&self) -> PathBuf {
        self.directory.join(DIRECTORY_FILE_NAME)
    }

    /// Path of the value file.
    #[must_use]
    pub fn value_file(&self) -> PathBuf {
        self.directory.join(VALUE_FILE_NAME)
    }

    /// Whether both index files already exist.
    #[must_use]
    pub fn files_exist(&self) -> bool {
        exists(&self.directory_file()) && exists(&self.value_file())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(Self::DEFAULT_DIRECTORY),
            page_size: DEFAULT_PAGE_SIZE,
            node_capacity: Self::DEFAULT_NODE_CAPACITY,
            cache_pages: Some(Self::DEFAULT_CACHE_PAGES),
        }
    }
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

fn parse_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    lookup(name).map_or(Ok(default), |value| {
        value
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a non-negative integer"),
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = IndexConfig::from_lookup(lookup_from(&[])).expect("defaults are valid");
        assert_eq!(config, IndexConfig::default());
        assert_eq!(config.directory, PathBuf::from("./data"));
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.node_capacity, 50);
        assert_eq!(config.cache_pages, Some(256));
    }

    #[test]
    fn test_overrides() {
        let config = IndexConfig::from_lookup(lookup_from(&[
            ("BPTREE_DIRECTORY", "/tmp/idx"),
            ("BPTREE_PAGE_SIZE", "8192"),
            ("BPTREE_NODE_CAPACITY", "128"),
            ("BPTREE_CACHE_PAGES", "0"),
        ]))
        .expect("valid config");

        assert_eq!(config.directory_file(), PathBuf::from("/tmp/idx/index.dir"));
        assert_eq!(config.value_file(), PathBuf::from("/tmp/idx/index.dat"));
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.node_capacity, 128);
        assert_eq!(config.cache_pages, None);
    }

    #[test]
    fn test_invalid_number() {
        let err = IndexConfig::from_lookup(lookup_from(&[("BPTREE_PAGE_SIZE", "big")]))
            .expect_err("not a number");
        assert_eq!(
            err.to_string(),
            "invalid value for BPTREE_PAGE_SIZE: 'big' is not a non-negative integer"
        );
    }

    #[test]
    fn test_validate_ranges() {
        let small_page = IndexConfig {
            page_size: 64,
            ..IndexConfig::default()
        };
        assert!(small_page.validate().is_err());

        let tiny_capacity = IndexConfig {
            node_capacity: 2,
            ..IndexConfig::default()
        };
        assert!(matches!(
            tiny_capacity.validate(),
            Err(ConfigError::InvalidValue { name, .. }) if name == "node_capacity"
        ));
    }
}
