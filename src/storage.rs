//! Object storage contract and a local-directory backend.
//!
//! Objects live at `{root}/{bucket}/{path}`; upload metadata (the cache
//! hint) is kept beside them under `{root}/.meta/`.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::AppError;

static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("static regex"));

const META_DIR: &str = ".meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub overwrite: bool,
    pub cache_control_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub cache_control_secs: u32,
}

#[derive(Debug)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub meta: Option<ObjectMeta>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object location: {0}")]
    InvalidPath(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for AppError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath(msg) => AppError::invalid("path", msg),
            StorageError::AlreadyExists(msg) => AppError::Conflict(msg),
            StorageError::NotFound(msg) => AppError::NotFound(msg),
            StorageError::Io(err) => AppError::Storage(err.to_string()),
        }
    }
}

#[rocket::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        options: UploadOptions,
    ) -> Result<(), StorageError>;

    async fn download(&self, bucket: &str, path: &str) -> Result<StoredObject, StorageError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}

pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(bucket).join(checked_relative(bucket, path)?))
    }

    fn meta_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        let relative = checked_relative(bucket, path)?;
        let mut meta = self.root.join(META_DIR).join(bucket).join(relative);
        meta.as_mut_os_string().push(".json");
        Ok(meta)
    }
}

/// Rejects bucket names outside `[a-z0-9-]` and any key that could escape
/// the bucket directory.
fn checked_relative(bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
    if !BUCKET_NAME.is_match(bucket) {
        return Err(StorageError::InvalidPath(format!("bad bucket name {bucket}")));
    }

    if path.is_empty() || path.contains('\\') {
        return Err(StorageError::InvalidPath(format!("bad object key {path}")));
    }

    let relative = Path::new(path);
    let all_normal = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));

    if !all_normal {
        return Err(StorageError::InvalidPath(format!("bad object key {path}")));
    }

    Ok(relative.to_path_buf())
}

#[rocket::async_trait]
impl ObjectStorage for LocalObjectStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        options: UploadOptions,
    ) -> Result<(), StorageError> {
        let target = self.object_path(bucket, path)?;

        if !options.overwrite && tokio::fs::try_exists(&target).await? {
            warn!("Refusing to overwrite existing object");
            return Err(StorageError::AlreadyExists(format!("{bucket}/{path}")));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        let meta_target = self.meta_path(bucket, path)?;
        if let Some(parent) = meta_target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let meta = ObjectMeta {
            cache_control_secs: options.cache_control_secs,
        };
        let encoded = serde_json::to_vec(&meta)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        tokio::fs::write(&meta_target, encoded).await?;

        info!("Object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download(&self, bucket: &str, path: &str) -> Result<StoredObject, StorageError> {
        let target = self.object_path(bucket, path)?;

        let bytes = match tokio::fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("{bucket}/{path}")));
            }
            Err(err) => return Err(err.into()),
        };

        let meta = match tokio::fs::read(self.meta_path(bucket, path)?).await {
            Ok(raw) => serde_json::from_slice(&raw).ok(),
            Err(_) => None,
        };

        Ok(StoredObject { bytes, meta })
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/{}/{}", self.public_base_url, bucket, path)
    }
}
