use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;

/// Largest file accepted for a movement attachment or product photo.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "webp"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    CustomerDocuments,
    ProductImages,
    MovementAttachments,
}

impl Bucket {
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::CustomerDocuments => "customer-documents",
            Bucket::ProductImages => "product-images",
            Bucket::MovementAttachments => "movement-attachments",
        }
    }
}

/// Filesystem-backed object store. Objects live at
/// `<root>/<bucket>/<path>` and are served under `/uploads`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Write `bytes` to `bucket/path`, replacing any existing object, and
    /// return the object's public URL.
    pub async fn upload(&self, bucket: Bucket, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;
        log::debug!("stored {} bytes at {}/{}", bytes.len(), bucket.name(), path);
        Ok(self.public_url(bucket, path))
    }

    pub async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(bucket, path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/uploads/{}/{}", self.public_base_url, bucket.name(), path)
    }

    /// Inverse of [`BlobStore::public_url`]: the object path inside `bucket`,
    /// if `url` points into it.
    pub fn path_from_url<'a>(&self, bucket: Bucket, url: &'a str) -> Option<&'a str> {
        let prefix = format!("{}/uploads/{}/", self.public_base_url, bucket.name());
        url.strip_prefix(prefix.as_str())
    }

    fn resolve(&self, bucket: Bucket, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let clean = path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(bucket.name()).join(relative))
    }
}

/// Lower-cased extension of an uploaded image, if it is one we accept.
pub fn image_extension(file_name: &str) -> Result<String, StorageError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(StorageError::Rejected(format!(
            "{file_name} is not a supported image type"
        )))
    }
}

/// Enforce the per-file size limit.
pub fn check_size(file_name: &str, len: usize) -> Result<(), StorageError> {
    if len > MAX_IMAGE_BYTES {
        return Err(StorageError::Rejected(format!("{file_name} is larger than 5MB")));
    }
    Ok(())
}

/// Content type recorded alongside an attachment.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_writes_file_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), "https://wh.example.com");

        let url = store
            .upload(Bucket::ProductImages, "p1/front.png", b"png-bytes")
            .await
            .unwrap();

        assert_eq!(url, "https://wh.example.com/uploads/product-images/p1/front.png");
        let written = std::fs::read(dir.path().join("product-images/p1/front.png")).unwrap();
        assert_eq!(written, b"png-bytes");
        assert_eq!(store.path_from_url(Bucket::ProductImages, &url), Some("p1/front.png"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), "");
        store.upload(Bucket::CustomerDocuments, "c/logo.png", b"x").await.unwrap();

        store.remove(Bucket::CustomerDocuments, "c/logo.png").await.unwrap();
        store.remove(Bucket::CustomerDocuments, "c/logo.png").await.unwrap();
        assert!(!dir.path().join("customer-documents/c/logo.png").exists());
    }

    #[tokio::test]
    async fn paths_cannot_escape_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), "");
        for bad in ["../secrets", "/etc/passwd", "", "a//b", "a/./b"] {
            let err = store.upload(Bucket::ProductImages, bad, b"x").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{bad} accepted");
        }
    }

    #[test]
    fn only_images_under_the_limit_are_accepted() {
        assert_eq!(image_extension("Dock Photo.JPG").unwrap(), "jpg");
        assert!(image_extension("manifest.exe").is_err());
        assert!(check_size("big.png", MAX_IMAGE_BYTES + 1).is_err());
        assert!(check_size("ok.png", MAX_IMAGE_BYTES).is_ok());
        assert_eq!(content_type_for("webp"), "image/webp");
    }
}
