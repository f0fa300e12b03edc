//! A single-process, disk-backed ordered index.
//!
//! Components, leaf to root:
//! - `codec`: typed keys and values to bytes and back
//! - `storage`: page files, the page cache and the value file
//! - `btree`: the B+ tree over those stores
//! - `config`: settings for file-backed indexes

pub mod btree;
pub mod codec;
pub mod config;
pub mod storage;

mod e2e_tests;
