use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

static DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/(\w+);base64,(.+)$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum PhotoStorageError {
    #[error("Invalid photo data: {0}")]
    InvalidData(String),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A profile photo as supplied by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoInput {
    /// Inline image to be uploaded.
    Upload {
        extension: String,
        content_type: String,
        bytes: Vec<u8>,
    },
    /// Absolute http(s) URL stored as-is.
    External(String),
}

impl PhotoInput {
    /// Returns `Ok(None)` for strings that are neither a base64 image data
    /// URI nor an http(s) URL.
    pub fn parse(value: &str) -> Result<Option<Self>, PhotoStorageError> {
        if let Some(captures) = DATA_URI.captures(value) {
            let subtype = captures[1].to_ascii_lowercase();
            let bytes = STANDARD
                .decode(captures[2].trim())
                .map_err(|e| PhotoStorageError::InvalidData(e.to_string()))?;
            if bytes.is_empty() {
                return Err(PhotoStorageError::InvalidData("empty image".to_string()));
            }
            return Ok(Some(PhotoInput::Upload {
                content_type: format!("image/{}", subtype),
                extension: subtype,
                bytes,
            }));
        }

        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(Some(PhotoInput::External(value.to_string())));
        }

        Ok(None)
    }
}

/// Builds `profiles/{user_id}-{millis}[-{filename}].{ext}`.
pub fn profile_photo_key(
    user_id: &str,
    extension: &str,
    filename: Option<&str>,
    millis: i64,
) -> String {
    let suffix = filename
        .map(|name| {
            let stem = Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            stem.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .take(64)
                .collect::<String>()
        })
        .filter(|s| !s.is_empty())
        .map(|s| format!("-{}", s))
        .unwrap_or_default();

    format!("profiles/{}-{}{}.{}", user_id, millis, suffix, extension)
}

/// Object storage for profile photos.
#[async_trait]
pub trait PhotoStorage: Send + Sync {
    /// Stores the object and returns its public URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PhotoStorageError>;
    async fn delete(&self, key: &str) -> Result<(), PhotoStorageError>;
    /// The key of a URL served by this storage, or `None` for foreign URLs.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// Stores photos on the local filesystem, served under `public_base_url`.
pub struct LocalPhotoStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalPhotoStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PhotoStorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PhotoStorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PhotoStorage for LocalPhotoStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PhotoStorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!("Stored {} photo at {}", content_type, path.display());
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), PhotoStorageError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}
