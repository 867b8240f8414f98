//! Key-value store capability consumed by the registry.
//!
//! Keys are `/`-delimited paths. `list` reports the direct children of a
//! prefix; path segments that only exist as prefixes of deeper keys show up
//! as container entries with an empty value, so a flat store (etcd) and a
//! store with explicit directory entries behave the same.

pub mod etcd;
pub mod memory;
pub mod sqlite;

use std::collections::HashSet;
use async_trait::async_trait;
use thiserror::Error;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Cannot connect to store: {0}")]
    Connection(String),

    #[error("Key {key} changed since version {expected}")]
    Conflict { key: String, expected: u64 },

    #[error("Store error: {0}")]
    Backend(String),
}

/// A stored entry. `version` changes on every write to the key.
/// `is_dir` marks containers, either written as directories or derived
/// from deeper keys; they carry no endpoint value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub is_dir: bool,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs and the config endpoint
    fn backend(&self) -> &'static str;

    /// Direct children of `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;

    async fn get(&self, key: &str) -> Result<KvPair>;

    async fn put(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<()>;

    /// Write only if the key still carries `expected_version`.
    /// Fails with `StoreError::Conflict` otherwise.
    async fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<()>;

    /// Release backend resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Range prefix covering everything below `prefix`
pub(crate) fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Reduce every entry below `prefix` to its direct children, synthesizing
/// container entries for deeper keys. Input order is preserved.
pub(crate) fn direct_children<I>(prefix: &str, entries: I) -> Vec<KvPair>
where
    I: IntoIterator<Item = KvPair>,
{
    let dir = dir_prefix(prefix);
    let mut seen = HashSet::new();
    let mut children = Vec::new();

    for pair in entries {
        let Some(rest) = pair.key.strip_prefix(dir.as_str()) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }

        match rest.split_once('/') {
            None => {
                if seen.insert(pair.key.clone()) {
                    children.push(pair);
                }
            }
            Some((segment, _)) => {
                let key = format!("{}{}", dir, segment);
                if seen.insert(key.clone()) {
                    children.push(KvPair {
                        key,
                        value: Vec::new(),
                        version: 0,
                        is_dir: true,
                    });
                }
            }
        }
    }

    children
}
