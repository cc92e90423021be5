//! In-memory generation store

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStore, CachedEntry, RequestKey, StoreError};

type Generation = BTreeMap<RequestKey, CachedEntry>;

/// Generation store held entirely in memory
///
/// Every operation takes the lock once, so `replace_generation` is atomic with
/// respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    generations: RwLock<BTreeMap<String, Generation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every generation, for before/after comparisons
    pub async fn snapshot(&self) -> BTreeMap<String, Generation> {
        self.generations.read().await.clone()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn generation_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.generations.read().await.keys().cloned().collect())
    }

    async fn has_generation(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.generations.read().await.contains_key(name))
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.generations.write().await.remove(name).is_some())
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, StoreError> {
        Ok(self
            .generations
            .read()
            .await
            .get(name)
            .map(|generation| generation.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError> {
        Ok(self
            .generations
            .read()
            .await
            .get(name)
            .and_then(|generation| generation.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, entry: CachedEntry) -> Result<(), StoreError> {
        self.generations
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn replace_generation(
        &self,
        name: &str,
        entries: Vec<CachedEntry>,
    ) -> Result<(), StoreError> {
        let generation: Generation = entries
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        self.generations
            .write()
            .await
            .insert(name.to_string(), generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;

    fn entry(url: &str, body: &'static str) -> CachedEntry {
        CachedEntry::from_response(RequestKey::get(url), &Response::new(200, body))
    }

    #[tokio::test]
    async fn test_missing_generation_reads_as_empty() {
        let store = MemoryStore::new();

        assert!(!store.has_generation("static-v1").await.unwrap());
        assert!(store.keys("static-v1").await.unwrap().is_empty());
        assert!(store
            .get("static-v1", &RequestKey::get("https://a.test/"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_put_creates_generation_lazily() {
        let store = MemoryStore::new();

        store.put("dynamic-v1", entry("https://a.test/a", "a")).await.unwrap();

        assert!(store.has_generation("dynamic-v1").await.unwrap());
        assert_eq!(store.generation_names().await.unwrap(), vec!["dynamic-v1"]);
    }

    #[tokio::test]
    async fn test_put_replaces_entry_at_same_key() {
        let store = MemoryStore::new();
        let key = RequestKey::get("https://a.test/a");

        store.put("dynamic-v1", entry(&key.url, "old")).await.unwrap();
        store.put("dynamic-v1", entry(&key.url, "new")).await.unwrap();

        let stored = store.get("dynamic-v1", &key).await.unwrap().unwrap();
        assert_eq!(stored.body.as_ref(), b"new");
        assert_eq!(store.keys("dynamic-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_generation_drops_previous_keys() {
        let store = MemoryStore::new();
        store.put("static-v1", entry("https://a.test/old", "x")).await.unwrap();

        store
            .replace_generation("static-v1", vec![entry("https://a.test/new", "y")])
            .await
            .unwrap();

        let keys = store.keys("static-v1").await.unwrap();
        assert_eq!(keys, vec![RequestKey::get("https://a.test/new")]);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.replace_generation("static-v1", Vec::new()).await.unwrap();

        assert!(store.delete_generation("static-v1").await.unwrap());
        assert!(!store.delete_generation("static-v1").await.unwrap());
    }
}
