//! services/api/src/adapters/storage.rs
//!
//! A filesystem-backed implementation of the `ObjectStorageService` port.
//! Stored files are served by the web layer under `/files`.

use async_trait::async_trait;
use equation_ace_core::domain::ImageBlob;
use equation_ace_core::ports::{ObjectStorageService, PortError, PortResult};
use std::path::{Component, Path, PathBuf};
use tracing::info;

#[derive(Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: PathBuf, public_base_url: &str) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolves a key below the root, refusing anything that could escape it.
    fn path_for(&self, key: &str) -> PortResult<PathBuf> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(PortError::Unexpected(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorageService for LocalObjectStorage {
    async fn upload_image(&self, key: &str, image: &ImageBlob) -> PortResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        tokio::fs::write(&path, &image.bytes)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!("Stored {} bytes at {}", image.bytes.len(), path.display());
        Ok(format!("{}/files/{}", self.public_base_url, key))
    }
}
