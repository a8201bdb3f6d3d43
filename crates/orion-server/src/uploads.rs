use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use orion_shared::FileRef;

use crate::error::ServerError;

const MAX_STORED_NAME_LEN: usize = 120;

/// Resolve `name` inside `base`, refusing anything but a single plain
/// file name.
fn resolve_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) if !name.contains('\\') => Ok(base.join(file)),
        _ => Err(ServerError::BadRequest("Invalid file name".to_string())),
    }
}

/// Reduce an uploaded file name to characters safe on every filesystem.
fn sanitize(display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Uploaded file bytes, stored flat under one directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::UploadStorage(format!(
                "Failed to create uploads directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Store `data` as `<item id>_<sanitized name>` and return the file
    /// reference to put in the item.
    pub async fn store(
        &self,
        item_id: &str,
        display_name: &str,
        data: &[u8],
    ) -> Result<FileRef, ServerError> {
        if data.len() > self.max_size {
            return Err(ServerError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let mut stored_name = format!("{}_{}", item_id, sanitize(display_name));
        if stored_name.len() > MAX_STORED_NAME_LEN {
            let mut cut = MAX_STORED_NAME_LEN;
            while !stored_name.is_char_boundary(cut) {
                cut -= 1;
            }
            stored_name.truncate(cut);
        }
        let path = resolve_within(&self.base_path, &stored_name)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::UploadStorage(format!("Failed to write upload {}: {}", stored_name, e))
        })?;

        debug!(stored = %stored_name, size = data.len(), "Stored upload");
        Ok(FileRef::new(display_name, stored_name))
    }

    pub async fn read(&self, stored_name: &str) -> Result<Vec<u8>, ServerError> {
        let path = resolve_within(&self.base_path, stored_name)?;

        match fs::read(&path).await {
            Ok(data) => {
                debug!(stored = %stored_name, size = data.len(), "Serving upload");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound(format!("File {}", stored_name)))
            }
            Err(e) => Err(ServerError::UploadStorage(format!(
                "Failed to read upload {}: {}",
                stored_name, e
            ))),
        }
    }

    /// Best-effort removal of a stored upload that no item refers to.
    pub async fn remove(&self, stored_name: &str) {
        let path = match resolve_within(&self.base_path, stored_name) {
            Ok(path) => path,
            Err(_) => return,
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!(stored = %stored_name, "Removed orphaned upload"),
            Err(e) => warn!(stored = %stored_name, error = %e, "Failed to remove orphaned upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (UploadStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let (store, _dir) = test_store().await;

        let file_ref = store
            .store("item_42", "holiday photo.jpg", b"jpeg-bytes")
            .await
            .unwrap();

        assert_eq!(file_ref.display_name, "holiday photo.jpg");
        assert_eq!(file_ref.stored_name, "item_42_holiday_photo.jpg");
        assert_eq!(store.read(&file_ref.stored_name).await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_too_large_rejected() {
        let (store, _dir) = test_store().await;
        let result = store.store("item_1", "big.bin", &[0u8; 2048]).await;
        assert!(matches!(result, Err(ServerError::UploadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.read("../data.json").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.read("a/b").await,
            Err(ServerError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.read("item_1_nothing.txt").await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_stored_file() {
        let (store, _dir) = test_store().await;
        let file_ref = store.store("item_7", "a.txt", b"abc").await.unwrap();

        store.remove(&file_ref.stored_name).await;

        assert!(matches!(
            store.read(&file_ref.stored_name).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize("..."), "file");
        assert_eq!(sanitize("résumé v2.pdf"), "résumé_v2.pdf");
    }
}
