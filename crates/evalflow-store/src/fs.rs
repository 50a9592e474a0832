use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::{validate_key, BlobStore, Result, StoreError};

/// Directory-backed store: one `<root>/<key>.<extension>` file per blob.
///
/// Writes go through a temp file in the same directory and are renamed into place, so a
/// reader never observes a half-written blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    extension: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "json".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.{}", self.extension)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8], overwrite: bool) -> Result<bool> {
        let path = self.blob_path(key)?;
        let dir = self.root.clone();
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;

            if overwrite {
                tmp.persist(&path).map_err(|e| e.error)?;
                return Ok(true);
            }

            match tmp.persist_noclobber(&path) {
                Ok(_) => Ok(true),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), "blob already present, not overwriting");
                    Ok(false)
                }
                Err(e) => Err(StoreError::Io(e.error)),
            }
        })
        .await?
    }
}
