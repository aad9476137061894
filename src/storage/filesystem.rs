//! Filesystem-backed blob storage.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! <base>/checkpoints/<job_id>/<step_index>.ckpt
//! <base>/results/<job_id>/<step_index>_<key>.result
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{Result, StorageBackend, StorageError};

pub struct FileSystemStorage {
    base: PathBuf,
}

impl FileSystemStorage {
    /// Open (creating if needed) a storage root at `base`.
    pub async fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base).await.map_err(|source| StorageError::Io {
            location: base.display().to_string(),
            source,
        })?;
        Ok(Self { base })
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn checkpoint_path(&self, job_id: Uuid, step_index: u32) -> PathBuf {
        self.base
            .join("checkpoints")
            .join(job_id.to_string())
            .join(format!("{step_index}.ckpt"))
    }

    fn result_path(&self, job_id: Uuid, step_index: u32, key: &str) -> PathBuf {
        self.base
            .join("results")
            .join(job_id.to_string())
            .join(format!("{step_index}_{key}.result"))
    }

    async fn write_blob(&self, path: &Path, data: &[u8]) -> Result<String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    location: parent.display().to_string(),
                    source,
                })?;
        }
        fs::write(path, data)
            .await
            .map_err(|source| StorageError::Io {
                location: path.display().to_string(),
                source,
            })?;
        Ok(path.display().to_string())
    }

    async fn read_blob(&self, location: &str) -> Result<Vec<u8>> {
        match fs::read(location).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                location: location.to_string(),
            }),
            Err(source) => Err(StorageError::Io {
                location: location.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn store_checkpoint(
        &self,
        job_id: Uuid,
        step_index: u32,
        data: &[u8],
    ) -> Result<String> {
        let path = self.checkpoint_path(job_id, step_index);
        self.write_blob(&path, data).await
    }

    async fn retrieve_checkpoint(&self, location: &str) -> Result<Vec<u8>> {
        self.read_blob(location).await
    }

    async fn store_result(
        &self,
        job_id: Uuid,
        step_index: u32,
        key: &str,
        data: &[u8],
    ) -> Result<String> {
        let path = self.result_path(job_id, step_index, key);
        self.write_blob(&path, data).await
    }

    async fn retrieve_result(&self, location: &str) -> Result<Vec<u8>> {
        self.read_blob(location).await
    }

    async fn delete(&self, location: &str) -> Result<bool> {
        match fs::remove_file(location).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io {
                location: location.to_string(),
                source,
            }),
        }
    }

    async fn delete_job_blobs(&self, job_id: Uuid) -> Result<()> {
        for dir in [
            self.base.join("checkpoints").join(job_id.to_string()),
            self.base.join("results").join(job_id.to_string()),
        ] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StorageError::Io {
                        location: dir.display().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}
