use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use crate::error::{Error, Result};
use crate::storage::backend::{StorageBackend, METADATA_FILE};

/// Snapshots as directories under a root: `<root>/<snapshot_id>/<file>`.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn create(&self, snapshot_id: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(snapshot_id)).await?;
        Ok(())
    }

    async fn list_ids_with_metadata(&self) -> Result<Vec<(String, Option<Bytes>)>> {
        let mut snapshots = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let metadata = match fs::read(entry.path().join(METADATA_FILE)).await {
                Ok(raw) => Some(Bytes::from(raw)),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    tracing::warn!("Error reading metadata for {}: {}", id, e);
                    None
                }
            };
            snapshots.push((id, metadata));
        }

        Ok(snapshots)
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path(key)).await {
            Ok(raw) => Ok(Some(Bytes::from(raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, &bytes).await?;
        Ok(())
    }

    async fn delete_prefix(&self, snapshot_id: &str) -> Result<usize> {
        let dir = self.root.join(snapshot_id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::SnapshotNotFound(snapshot_id.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound(snapshot_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut removed = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }
        fs::remove_dir(&dir).await?;

        Ok(removed)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}
