use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

pub const METADATA_FILE: &str = "metadata.json";

/// Byte-level persistence for snapshots. Keys are `<snapshot_id>/<file>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepares the location for a new snapshot.
    async fn create(&self, snapshot_id: &str) -> Result<()>;

    /// Every snapshot id, paired with its raw metadata if that object exists.
    async fn list_ids_with_metadata(&self) -> Result<Vec<(String, Option<Bytes>)>>;

    /// `None` when the key does not exist.
    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>>;

    /// Upserts the object at `key`.
    async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<()>;

    /// Removes everything under the snapshot. Fails with
    /// `Error::SnapshotNotFound` when there is nothing to remove.
    async fn delete_prefix(&self, snapshot_id: &str) -> Result<usize>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

pub fn key(snapshot_id: &str, file: &str) -> String {
    format!("{}/{}", snapshot_id, file)
}

/// Rejects ids that could escape the snapshot root.
pub fn validate_snapshot_id(snapshot_id: &str) -> Result<()> {
    let bad = snapshot_id.is_empty()
        || snapshot_id.contains('/')
        || snapshot_id.contains('\\')
        || snapshot_id.contains("..");
    if bad {
        return Err(Error::InvalidSnapshotId(snapshot_id.to_string()));
    }
    Ok(())
}
