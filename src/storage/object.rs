use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{parse_url_opts, ObjectMeta, ObjectStore};
use url::Url;

use crate::error::{Error, Result};
use crate::storage::backend::{StorageBackend, METADATA_FILE};

/// Snapshots as objects keyed `<prefix>/<snapshot_id>/<file>` in any store
/// `object_store` understands (S3, GCS, Azure, local files, memory).
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    label: String,
}

impl ObjectBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        let label = format!("{}/{}", store, prefix);
        Self {
            store,
            prefix,
            label,
        }
    }

    /// Builds the store from a URL. Credentials and region come from the
    /// usual `AWS_*`, `GOOGLE_*` and `AZURE_*` environment variables.
    pub fn with_url(url: &Url) -> Result<Self> {
        let options = std::env::vars().map(|(key, value)| (key.to_ascii_lowercase(), value));
        let (store, prefix) = parse_url_opts(url, options)?;
        let mut backend = Self::new(Arc::from(store), prefix);
        backend.label = url.to_string();
        Ok(backend)
    }

    fn path(&self, key: &str) -> Path {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.prefix.clone(), |path, part| path.child(part))
    }

    fn root(&self) -> Option<&Path> {
        (!self.prefix.as_ref().is_empty()).then_some(&self.prefix)
    }
}

#[async_trait]
impl StorageBackend for ObjectBackend {
    async fn create(&self, _snapshot_id: &str) -> Result<()> {
        // Object stores have no directories; the snapshot exists once its
        // first object is written.
        Ok(())
    }

    async fn list_ids_with_metadata(&self) -> Result<Vec<(String, Option<Bytes>)>> {
        let listing = self.store.list_with_delimiter(self.root()).await?;

        let mut snapshots = Vec::new();
        for dir in listing.common_prefixes {
            let Some(id) = dir.filename().map(str::to_string) else {
                continue;
            };
            let metadata = match self.get_bytes(&format!("{}/{}", id, METADATA_FILE)).await {
                Ok(metadata) => metadata,
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
        match self.store.get(&self.path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.store.put(&self.path(key), bytes.into()).await?;
        Ok(())
    }

    async fn delete_prefix(&self, snapshot_id: &str) -> Result<usize> {
        let dir = self.path(snapshot_id);
        let objects: Vec<ObjectMeta> = self.store.list(Some(&dir)).try_collect().await?;
        if objects.is_empty() {
            return Err(Error::SnapshotNotFound(snapshot_id.to_string()));
        }

        for object in &objects {
            self.store.delete(&object.location).await?;
        }
        Ok(objects.len())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
