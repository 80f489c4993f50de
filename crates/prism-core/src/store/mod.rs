//! Object store collaborators.
//!
//! The pipeline never talks to a concrete storage service. It is handed an
//! [`ObjectStore`] for the source side and one for the output side, which
//! keeps decode/generate testable without a network and lets tests swap in
//! [`MemoryStore`].

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;

/// An object read from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    /// Content type recorded by the store, if it keeps one
    pub content_type: Option<String>,
}

/// Capability set the pipeline needs from a storage service.
///
/// Uses `async_trait` because the stores are shared as `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store name for logging (e.g., "memory", "fs").
    fn name(&self) -> &str;

    /// Read an object.
    async fn get(&self, container: &str, key: &str) -> Result<StoredObject, StoreError>;

    /// Write an object, replacing any existing object at the same key.
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Reject keys that cannot address a single object.
///
/// Keys are `/`-separated; empty segments, `.`/`..` segments, and leading
/// slashes are refused so a key can never escape its container.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') {
        return Err(invalid("leading '/'"));
    }
    if key.contains('\0') {
        return Err(invalid("NUL byte"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("relative path segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Reject container names that are not a single plain segment.
pub fn validate_container(container: &str) -> Result<(), StoreError> {
    if container.is_empty() || container.contains('/') || container == "." || container == ".." {
        return Err(StoreError::InvalidKey {
            key: container.to_string(),
            reason: "container must be a single plain name".to_string(),
        });
    }
    Ok(())
}
