use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use async_trait::async_trait;

use super::{direct_children, dir_prefix, KvPair, KvStore, Result, StoreError, WriteOptions};

struct Entry {
    value: Vec<u8>,
    version: u64,
    is_dir: bool,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: u64,
}

/// Process-local store, lost on exit
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn write(&mut self, key: &str, value: &[u8], is_dir: bool) {
        self.revision += 1;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                version: self.revision,
                is_dir,
            },
        );
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let dir = dir_prefix(prefix);
        let inner = self.lock()?;

        let below = inner
            .entries
            .range(dir.clone()..)
            .take_while(|(key, _)| key.starts_with(dir.as_str()))
            .map(|(key, entry)| KvPair {
                key: key.clone(),
                value: entry.value.clone(),
                version: entry.version,
                is_dir: entry.is_dir,
            });

        Ok(direct_children(prefix, below))
    }

    async fn get(&self, key: &str) -> Result<KvPair> {
        let inner = self.lock()?;
        inner
            .entries
            .get(key)
            .map(|entry| KvPair {
                key: key.to_string(),
                value: entry.value.clone(),
                version: entry.version,
                is_dir: entry.is_dir,
            })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<()> {
        self.lock()?.write(key, value, options.is_dir);
        Ok(())
    }

    async fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<()> {
        let mut inner = self.lock()?;
        let current = inner.entries.get(key).map(|entry| entry.version);

        if current != Some(expected_version) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
            });
        }

        inner.write(key, value, false);
        Ok(())
    }
}

/// Store that lets another writer touch a key right after every read,
/// so a conditional write based on that read always loses.
#[cfg(test)]
pub(crate) struct ContendedStore {
    inner: MemoryStore,
}

#[cfg(test)]
impl ContendedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl KvStore for ContendedStore {
    fn backend(&self) -> &'static str {
        "contended"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str) -> Result<KvPair> {
        let pair = self.inner.get(key).await?;
        let mut touched = pair.value.clone();
        touched.extend_from_slice(b"&touched=1");
        self.inner.put(key, &touched, WriteOptions::default()).await?;
        Ok(pair)
    }

    async fn put(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<()> {
        self.inner.put(key, value, options).await
    }

    async fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<()> {
        self.inner.put_if_version(key, value, expected_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new();
        store.put("a/b", b"x=1", WriteOptions::default()).await.unwrap();

        let pair = store.get("a/b").await.unwrap();
        assert_eq!(pair.value, b"x=1".to_vec());
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_if_version_detects_intervening_write() {
        let store = MemoryStore::new();
        store.put("k", b"1", WriteOptions::default()).await.unwrap();
        let read = store.get("k").await.unwrap();

        store.put("k", b"2", WriteOptions::default()).await.unwrap();

        let err = store.put_if_version("k", b"3", read.version).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get("k").await.unwrap().value, b"2".to_vec());
    }

    #[tokio::test]
    async fn test_list_reports_direct_children() {
        let store = MemoryStore::new();
        store.put("base/svc/a", b"", WriteOptions::default()).await.unwrap();
        store.put("base/svc/b", b"", WriteOptions::default()).await.unwrap();
        store.put("other/svc/c", b"", WriteOptions::default()).await.unwrap();

        let services = store.list("base").await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].key, "base/svc");

        let endpoints = store.list("base/svc").await.unwrap();
        assert_eq!(endpoints.len(), 2);
    }
}
