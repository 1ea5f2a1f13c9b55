//! Scan image storage
//!
//! Predictions only ever hold an opaque key. A time-limited signed URL is
//! minted at read time (review prompts, admin listings, polling responses)
//! and checked by `GET /images/{key}`.

use async_trait::async_trait;
use nubcheck_common::signing::{self, SignatureError};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Image store errors
#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty image")]
    Empty,

    #[error("Invalid image key: {0}")]
    InvalidKey(String),

    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Signed URL rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImageStoreError {
    /// Caller's fault (maps to 400)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ImageStoreError::UnsupportedType(_)
                | ImageStoreError::TooLarge { .. }
                | ImageStoreError::Empty
        )
    }
}

/// Image bytes with their MIME type
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist an upload and return its opaque key
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, ImageStoreError>;

    async fn load(&self, key: &str) -> Result<StoredImage, ImageStoreError>;

    /// Time-limited URL for reading `key`
    fn resolve_read_url(&self, key: &str) -> String;

    /// Check a URL previously produced by [`ImageStore::resolve_read_url`]
    fn verify_read_url(&self, key: &str, expires: i64, signature: &str) -> Result<(), ImageStoreError>;
}

/// Check type and size of an upload; returns the file extension to use
pub fn validate_upload(
    content_type: &str,
    size: usize,
    max_bytes: usize,
) -> Result<&'static str, ImageStoreError> {
    let extension = extension_for(content_type)
        .ok_or_else(|| ImageStoreError::UnsupportedType(content_type.to_string()))?;
    if size == 0 {
        return Err(ImageStoreError::Empty);
    }
    if size > max_bytes {
        return Err(ImageStoreError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(extension)
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Images kept in a local directory and served by this process
pub struct LocalImageStore {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
    url_ttl_secs: i64,
    max_bytes: usize,
}

impl LocalImageStore {
    pub fn new(
        root: PathBuf,
        public_base_url: &str,
        signing_secret: String,
        url_ttl_secs: i64,
        max_bytes: usize,
    ) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_secret,
            url_ttl_secs,
            max_bytes,
        }
    }

    /// Map a key to a path under the root, refusing anything that could escape it
    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        let relative = Path::new(key);
        let safe = key.starts_with("ultrasounds/")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ImageStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, ImageStoreError> {
        let extension = validate_upload(content_type, bytes.len(), self.max_bytes)?;
        let key = format!(
            "ultrasounds/{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            extension
        );

        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(key = %key, size = bytes.len(), "Stored scan image");
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<StoredImage, ImageStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(StoredImage {
                bytes,
                content_type: content_type_for(key).to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ImageStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_read_url(&self, key: &str) -> String {
        let expires = chrono::Utc::now().timestamp() + self.url_ttl_secs;
        let sig = signing::sign_url(key, expires, &self.signing_secret);
        format!(
            "{}/images/{}?expires={}&sig={}",
            self.public_base_url, key, expires, sig
        )
    }

    fn verify_read_url(&self, key: &str, expires: i64, signature: &str) -> Result<(), ImageStoreError> {
        signing::verify_url_signature(
            key,
            expires,
            signature,
            &self.signing_secret,
            chrono::Utc::now().timestamp(),
        )?;
        Ok(())
    }
}
