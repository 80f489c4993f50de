//! Local filesystem object store.
//!
//! Each container is a directory under the root and each key is a relative
//! path inside it. Writes go to a sibling temp file and are renamed into
//! place, so a reader never observes a half-written object and a repeated
//! write simply replaces the previous one.

use async_trait::async_trait;
use image::ImageFormat;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{validate_container, validate_key, ObjectStore, StoredObject};
use crate::error::StoreError;

/// Distinguishes staging files of concurrent writes from this process.
static NEXT_STAGING: AtomicU64 = AtomicU64::new(0);

/// Object store backed by a directory tree.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_container(container)?;
        validate_key(key)?;
        let mut path = self.root.join(container);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    fn classify(container: &str, key: &str, error: std::io::Error) -> StoreError {
        match error.kind() {
            IoErrorKind::NotFound => StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            },
            IoErrorKind::PermissionDenied => StoreError::AccessDenied {
                container: container.to_string(),
                key: key.to_string(),
            },
            _ => StoreError::Transient(format!("{container}/{key}: {error}")),
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn get(&self, container: &str, key: &str) -> Result<StoredObject, StoreError> {
        let path = self.object_path(container, key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Self::classify(container, key, e))?;

        // The filesystem keeps no content type; infer one from the extension.
        let content_type = ImageFormat::from_path(&path)
            .ok()
            .map(|f| f.to_mime_type().to_string());

        Ok(StoredObject {
            bytes,
            content_type,
        })
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| Self::classify(container, key, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = parent.join(format!(
            ".{file_name}.partial-{}-{}",
            std::process::id(),
            NEXT_STAGING.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&staging, bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Self::classify(container, key, e));
        }
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| Self::classify(container, key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store
            .put("derived", "large/2024/cat.jpg", b"jpeg", "image/jpeg")
            .await
            .unwrap();

        let on_disk = dir.path().join("derived/large/2024/cat.jpg");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"jpeg");
        assert_eq!(store.name(), "fs");
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_key_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let (first, second) = tokio::join!(
            store.put("derived", "small/cat.jpg", b"first", "image/jpeg"),
            store.put("derived", "small/cat.jpg", b"second", "image/jpeg"),
        );
        first.unwrap();
        second.unwrap();

        let written = std::fs::read(dir.path().join("derived/small/cat.jpg")).unwrap();
        assert!(written == b"first" || written == b"second");
        // No staging files are left behind
        let entries = std::fs::read_dir(dir.path().join("derived/small")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_get_infers_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/cat.png"), b"png").unwrap();

        let store = FsStore::new(dir.path());
        let object = store.get("uploads", "cat.png").await.unwrap();
        assert_eq!(object.bytes, b"png");
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.get("uploads", "missing.jpg").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_repeated_put_overwrites_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.put("derived", "small/a.jpg", b"first", "image/jpeg").await.unwrap();
        store.put("derived", "small/a.jpg", b"second", "image/jpeg").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("derived/small"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
        let object = store.get("derived", "small/a.jpg").await.unwrap();
        assert_eq!(object.bytes, b"second");
    }

    #[tokio::test]
    async fn test_escaping_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let err = store
            .put("derived", "../outside.jpg", b"x", "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }
}
