//! End-to-end tests over file-backed indexes.
//!
//! Each test file covers a specific scenario, using seeded random inputs
//! so failures reproduce.

#![cfg(test)]

mod helpers;

mod test_corruption;
mod test_random_puts;
mod test_reopen;
mod test_small_cache;
mod test_string_keys;
mod test_update_overwrites;
