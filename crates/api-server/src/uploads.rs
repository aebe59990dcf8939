use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::extract::multipart::Field;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Where uploaded reel inputs are kept. Keys are what the reel rows store.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Stores one multipart file field and returns its key.
    async fn save_field(&self, field: Field<'_>) -> ApiResult<String>;

    /// Whether `key` names a file held by this storage.
    async fn contains(&self, key: &str) -> bool;

    /// Removes the given files. Keys outside the storage are left alone.
    async fn remove(&self, keys: &[String]);
}

/// Local directory holding uploaded videos, audio tracks and images. Keys are
/// file paths inside the directory.
#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Where an upload named `filename` lands: `{uuid}_{filename}`.
    pub fn path_for(&self, filename: Option<&str>) -> PathBuf {
        self.dir
            .join(format!("{}_{}", Uuid::new_v4(), sanitize_filename(filename)))
    }
}

#[async_trait]
impl FileStorage for UploadStore {
    /// Streams the field to disk. A partially written file is removed when
    /// the upload breaks off.
    async fn save_field(&self, mut field: Field<'_>) -> ApiResult<String> {
        let path = self.path_for(field.file_name());
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::File::create(&path).await?;

        let written = match copy_field(&mut field, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                remove_files([&path]).await;
                return Err(e);
            }
        };

        info!("Stored upload {} ({written} bytes)", path.display());
        Ok(path.to_string_lossy().to_string())
    }

    async fn contains(&self, key: &str) -> bool {
        is_within(&self.dir, Path::new(key)).await
    }

    async fn remove(&self, keys: &[String]) {
        for key in keys {
            if self.contains(key).await {
                remove_files([key]).await;
            } else {
                warn!("Not removing {key}: it is not inside {}", self.dir.display());
            }
        }
    }
}

async fn copy_field(field: &mut Field<'_>, file: &mut tokio::fs::File) -> ApiResult<usize> {
    let mut written = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::unprocessable(format!("Upload interrupted: {e}")))?
    {
        written += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

/// True when `path` is an existing file below `dir` once both are resolved,
/// so `..` segments and symlinks cannot point elsewhere.
pub async fn is_within(dir: &Path, path: &Path) -> bool {
    let (Ok(dir), Ok(path)) = (
        tokio::fs::canonicalize(dir).await,
        tokio::fs::canonicalize(path).await,
    ) else {
        return false;
    };
    path != dir && path.starts_with(&dir) && path.is_file()
}

/// Keeps only the final path component and replaces anything outside
/// `[A-Za-z0-9._-]` so uploads cannot escape the upload directory.
pub fn sanitize_filename(filename: Option<&str>) -> String {
    let base = filename
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Best-effort removal; missing files are fine, other failures are logged.
pub async fn remove_files<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) {
    for path in paths {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename(Some("clip.mp4")), "clip.mp4");
        assert_eq!(sanitize_filename(Some("../../etc/passwd")), "passwd");
        assert_eq!(sanitize_filename(Some("C:\\videos\\my clip.mov")), "my_clip.mov");
        assert_eq!(sanitize_filename(Some("..")), "upload");
        assert_eq!(sanitize_filename(Some(".hidden")), "hidden");
        assert_eq!(sanitize_filename(None), "upload");
    }

    #[test]
    fn stored_names_are_prefixed_with_a_uuid() {
        let store = UploadStore::new(PathBuf::from("/data/uploads"));
        let path = store.path_for(Some("song.mp3"));
        assert_eq!(path.parent(), Some(Path::new("/data/uploads")));

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let (prefix, rest) = name.split_once('_').unwrap();
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(rest, "song.mp3");
    }

    #[tokio::test]
    async fn removal_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf());
        let path = store.path_for(Some("a.txt"));
        std::fs::write(&path, b"hello").unwrap();

        remove_files([&path, &dir.path().join("never-existed")]).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn only_files_inside_the_directory_belong_to_the_store() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let store = UploadStore::new(uploads.clone());

        let inside = store.path_for(Some("clip.mp4"));
        std::fs::write(&inside, b"v").unwrap();
        let outside = root.path().join("precious.txt");
        std::fs::write(&outside, b"keep me").unwrap();
        let sneaky = uploads.join("..").join("precious.txt");

        assert!(store.contains(&inside.to_string_lossy()).await);
        assert!(!store.contains(&outside.to_string_lossy()).await);
        assert!(!store.contains(&sneaky.to_string_lossy()).await);
        assert!(!store.contains(&uploads.to_string_lossy()).await);
        assert!(!store.contains("relative/missing.mp4").await);

        store
            .remove(&[
                outside.to_string_lossy().to_string(),
                sneaky.to_string_lossy().to_string(),
                inside.to_string_lossy().to_string(),
            ])
            .await;
        assert!(outside.exists());
        assert!(!inside.exists());
    }
}
