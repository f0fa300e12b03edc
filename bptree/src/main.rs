#![cfg_attr(not(test), deny(clippy::unwrap_used))]
//! Load tool: runs a seeded random workload against a file-backed index.
//!
//! Settings come from the `BPTREE_*` environment variables (see
//! `bptree::config`), plus:
//! - `BPTREE_WORKLOAD_OPS`: number of random puts (default: `1000`)
//! - `BPTREE_WORKLOAD_SEED`: RNG seed (default: `0`)

use std::collections::HashMap;
use std::time::Instant;

use bptree::btree::{BTreeError, FileTree};
use bptree::codec::{StringCodec, U32Codec};
use bptree::config::IndexConfig;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keys are drawn from `0..KEY_RANGE`.
const KEY_RANGE: u32 = 10_000;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let ops = env_u64("BPTREE_WORKLOAD_OPS", 1000);
    let seed = env_u64("BPTREE_WORKLOAD_SEED", 0);

    tracing::info!(
        "Loaded configuration: directory={}, page_size={}, node_capacity={}, cache_pages={:?}",
        config.directory.display(),
        config.page_size,
        config.node_capacity,
        config.cache_pages
    );

    if let Err(e) = run(&config, ops, seed) {
        tracing::error!("Workload failed: {e}");
        std::process::exit(1);
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::error!("invalid value for {name}: '{value}' is not a number");
            std::process::exit(1);
        }),
        Err(_) => default,
    }
}

fn run(config: &IndexConfig, ops: u64, seed: u64) -> Result<(), BTreeError> {
    let mut tree = FileTree::open_or_create_files(config, U32Codec, StringCodec)?;
    let starting_len = tree.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written: HashMap<u32, String> = HashMap::new();

    let started = Instant::now();
    for _ in 0..ops {
        let key = rng.random_range(0..KEY_RANGE);
        let len = rng.random_range(5..105);
        let value: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();

        tree.put(&key, &value)?;
        written.insert(key, value);
    }
    tracing::info!(
        ops,
        distinct_keys = written.len(),
        elapsed = ?started.elapsed(),
        "finished puts"
    );

    for (key, value) in &written {
        if tree.get(key)?.as_ref() != Some(value) {
            return Err(BTreeError::InvariantViolation(format!(
                "key {key} does not read back its last value"
            )));
        }
    }

    let mut previous = None;
    let mut scanned = 0u64;
    for entry in tree.iter() {
        let (key, _) = entry?;
        if previous.is_some_and(|p| p >= key) {
            return Err(BTreeError::InvariantViolation(format!(
                "iteration out of order at key {key}"
            )));
        }
        previous = Some(key);
        scanned += 1;
    }

    let stats = tree.check_invariants()?;
    let cache = tree.pages().stats();
    tracing::info!(
        starting_len,
        entries = stats.entries,
        scanned,
        height = stats.height,
        internal_nodes = stats.internal_nodes,
        leaf_nodes = stats.leaf_nodes,
        cache_hits = cache.hits,
        cache_misses = cache.misses,
        cache_evictions = cache.evictions,
        "verified index"
    );

    tree.close()
}
