use std::path::{Component, Path, PathBuf};

use nuancier_store::UrlResolver;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

/// Resolve a storage key below `root`, refusing anything that would escape it.
fn ensure_within(root: &Path, key: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
        }
    }
    if resolved == root || !resolved.starts_with(root) {
        return Err(ServerError::BadRequest("Invalid media key".to_string()));
    }
    Ok(resolved)
}

/// Keep ASCII letters, digits, `.`, `-` and `_` of an uploaded file name.
fn sanitize_filename(original: &str) -> String {
    let base = original.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '-');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Gallery files on local disk, addressed by storage key.
///
/// Keys look like `colors/{color_slug}/gallery/{prefix}-{file_name}`; the
/// random prefix keeps two uploads of the same file name apart.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    base_url: String,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(root: PathBuf, base_url: String, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&root).await.map_err(|e| {
            ServerError::MediaStorage(format!(
                "Failed to create media directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        let root = root.canonicalize().unwrap_or(root);

        info!(path = %root.display(), %base_url, "Media store initialized");

        Ok(Self {
            root,
            base_url,
            max_size,
        })
    }

    /// Check an upload against the size limit before anything is written.
    pub fn check_size(&self, size: usize) -> Result<(), ServerError> {
        if size == 0 {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if size > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    /// Write one gallery file for `color_slug` and return its storage key.
    pub async fn store(&self, color_slug: &str, file_name: &str, data: &[u8]) -> Result<String, ServerError> {
        self.check_size(data.len())?;

        let prefix = Uuid::new_v4().simple().to_string();
        let key = format!(
            "colors/{color_slug}/gallery/{}-{}",
            &prefix[..12],
            sanitize_filename(file_name)
        );
        let path = ensure_within(&self.root, &key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ServerError::MediaStorage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to write {key}: {e}")))?;

        debug!(%key, size = data.len(), "Stored media file");
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, ServerError> {
        let path = ensure_within(&self.root, key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServerError::NotFound(format!("media {key}")));
        }

        fs::read(&path)
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to read {key}: {e}")))
    }

    /// Remove the file behind `key`.  A file that is already gone is not an
    /// error.
    pub async fn release(&self, key: &str) -> Result<(), ServerError> {
        let path = ensure_within(&self.root, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(%key, "Released media file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::MediaStorage(format!("Failed to delete {key}: {e}"))),
        }
    }

    /// Best-effort removal after the database rows are gone.
    pub async fn release_all(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.release(key).await {
                warn!(%key, error = %e, "Could not release media file");
            }
        }
    }
}

impl UrlResolver for MediaStore {
    fn url_for(&self, file_key: &str) -> String {
        format!("{}/{}", self.base_url, file_key)
    }
}

/// Content type for a stored file, from its extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (MediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), "/media".into(), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let (store, _dir) = test_store().await;
        let key = store.store("sky", "Façade photo.JPG", b"jpeg-bytes").await.unwrap();

        assert!(key.starts_with("colors/sky/gallery/"));
        assert!(key.ends_with("-Fa-ade-photo.JPG"));
        assert_eq!(store.read(&key).await.unwrap(), b"jpeg-bytes");
        assert_eq!(store.url_for(&key), format!("/media/{key}"));
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_keys() {
        let (store, _dir) = test_store().await;
        let a = store.store("sky", "a.png", b"1").await.unwrap();
        let b = store.store("sky", "a.png", b"2").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (store, _dir) = test_store().await;
        let key = store.store("sky", "a.png", b"1").await.unwrap();

        store.release(&key).await.unwrap();
        store.release(&key).await.unwrap();
        assert!(matches!(store.read(&key).await, Err(ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_limits() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.store("sky", "a.png", b"").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.store("sky", "a.png", &[0u8; 2048]).await,
            Err(ServerError::PayloadTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.read("/etc/passwd").await.is_err());
        assert!(store.release("colors/../../x").await.is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../evil.png"), "evil.png");
        assert_eq!(sanitize_filename("C:\\photos\\mur 1.jpg"), "mur-1.jpg");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("colors/a/gallery/x.JPG"), "image/jpeg");
        assert_eq!(content_type_for("colors/a/gallery/x"), "application/octet-stream");
    }
}
