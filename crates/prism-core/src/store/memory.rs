//! In-memory object store.
//!
//! Used as the substitute collaborator in tests and for embedding the
//! pipeline without a real storage service. Faults can be injected per key
//! to exercise the failure classification paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{validate_key, ObjectStore, StoredObject};
use crate::error::StoreError;

type ObjectKey = (String, String);

/// Thread-safe in-memory store keyed by (container, key).
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, StoredObject>>,
    get_faults: Mutex<HashMap<ObjectKey, StoreError>>,
    put_faults: Mutex<HashMap<ObjectKey, StoreError>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

/// Poisoning only happens if a holder panicked; the map itself stays consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing fault injection and counters.
    pub fn insert(&self, container: &str, key: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        lock(&self.objects).insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.map(String::from),
            },
        );
    }

    /// Read an object without going through the async trait.
    pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys present in a container, sorted.
    pub fn keys(&self, container: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Total number of stored objects across containers.
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get` calls made through [`ObjectStore`].
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put` calls made through [`ObjectStore`], including failed ones.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make every `get` of this object fail with `error`.
    pub fn fail_get(&self, container: &str, key: &str, error: StoreError) {
        lock(&self.get_faults).insert((container.to_string(), key.to_string()), error);
    }

    /// Make every `put` to this object fail with `error`.
    pub fn fail_put(&self, container: &str, key: &str, error: StoreError) {
        lock(&self.put_faults).insert((container.to_string(), key.to_string()), error);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        lock(&self.get_faults).clear();
        lock(&self.put_faults).clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, container: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let id = (container.to_string(), key.to_string());

        if let Some(error) = lock(&self.get_faults).get(&id) {
            return Err(error.clone());
        }
        lock(&self.objects)
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        validate_key(key)?;
        let id = (container.to_string(), key.to_string());

        if let Some(error) = lock(&self.put_faults).get(&id) {
            return Err(error.clone());
        }
        lock(&self.objects).insert(
            id,
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new();
        store
            .put("derived", "small/a.jpg", b"abc", "image/jpeg")
            .await
            .unwrap();

        let object = store.get("derived", "small/a.jpg").await.unwrap();
        assert_eq!(object.bytes, b"abc");
        assert_eq!(object.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        store.put("c", "k", b"one", "text/plain").await.unwrap();
        store.put("c", "k", b"two", "text/plain").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.object("c", "k").unwrap().bytes, b"two");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("uploads", "nope.jpg").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        store.insert("uploads", "a.jpg", vec![1, 2, 3], None);
        store.fail_get("uploads", "a.jpg", StoreError::Transient("throttled".into()));
        store.fail_put("derived", "small/a.jpg", StoreError::Transient("reset".into()));

        assert!(store.get("uploads", "a.jpg").await.unwrap_err().is_transient());
        assert!(store
            .put("derived", "small/a.jpg", b"x", "image/jpeg")
            .await
            .is_err());
        assert!(store.object("derived", "small/a.jpg").is_none());

        store.clear_faults();
        assert!(store.get("uploads", "a.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryStore::new();
        let err = store.put("c", "../x", b"", "text/plain").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[test]
    fn test_keys_are_per_container() {
        let store = MemoryStore::new();
        store.insert("a", "2", vec![], None);
        store.insert("a", "1", vec![], None);
        store.insert("b", "3", vec![], None);
        assert_eq!(store.keys("a"), vec!["1".to_string(), "2".to_string()]);
    }
}
