use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    format_timestamp, snapshot_id_for, Commit, PullRequest, Repository, SnapshotData,
    SnapshotMetadata,
};
use crate::storage::backend::{key, validate_snapshot_id, StorageBackend, METADATA_FILE};
use crate::storage::columnar::{self, Dataset};

/// Append-only, timestamp-keyed history of snapshots on top of a backend.
pub struct SnapshotStore {
    backend: Arc<dyn StorageBackend>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub async fn create_snapshot(
        &self,
        repositories: &[Repository],
        commits: &[Commit],
        pull_requests: &[PullRequest],
    ) -> Result<String> {
        self.create_snapshot_at(Utc::now(), repositories, commits, pull_requests)
            .await
    }

    /// Writes one dataset per non-empty list, then the metadata. The writes
    /// are independent: an interrupted call can leave a partial snapshot.
    pub async fn create_snapshot_at(
        &self,
        collected_at: DateTime<Utc>,
        repositories: &[Repository],
        commits: &[Commit],
        pull_requests: &[PullRequest],
    ) -> Result<String> {
        let timestamp = format_timestamp(collected_at);
        let snapshot_id = snapshot_id_for(&timestamp);

        self.backend.create(&snapshot_id).await?;
        self.write_dataset(&snapshot_id, repositories).await?;
        self.write_dataset(&snapshot_id, commits).await?;
        self.write_dataset(&snapshot_id, pull_requests).await?;

        let metadata = SnapshotMetadata {
            timestamp,
            repositories_count: repositories.len(),
            commits_count: commits.len(),
            pull_requests_count: pull_requests.len(),
            snapshot_id: snapshot_id.clone(),
        };
        let metadata_json = serde_json::to_vec_pretty(&metadata)?;
        self.backend
            .put_bytes(&key(&snapshot_id, METADATA_FILE), Bytes::from(metadata_json))
            .await?;

        tracing::info!(
            "Snapshot created: {} ({} repos, {} commits, {} PRs) in {}",
            snapshot_id,
            repositories.len(),
            commits.len(),
            pull_requests.len(),
            self.backend.describe()
        );
        Ok(snapshot_id)
    }

    async fn write_dataset<D: Dataset>(&self, snapshot_id: &str, rows: &[D]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let bytes = columnar::encode(rows)?;
        self.backend
            .put_bytes(&key(snapshot_id, D::FILE_NAME), bytes)
            .await
    }

    /// Metadata of every readable snapshot, newest first.
    pub async fn list_snapshots(&self) -> Vec<SnapshotMetadata> {
        let entries = match self.backend.list_ids_with_metadata().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Error listing snapshots: {}", e);
                return Vec::new();
            }
        };

        let mut snapshots: Vec<SnapshotMetadata> = entries
            .into_iter()
            .filter_map(|(id, raw)| {
                let Some(raw) = raw else {
                    tracing::warn!("Snapshot {} has no metadata, skipping", id);
                    return None;
                };
                match serde_json::from_slice(&raw) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        tracing::warn!("Error reading metadata for {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        snapshots
    }

    pub async fn get_latest_snapshot(&self) -> Option<SnapshotMetadata> {
        self.list_snapshots().await.into_iter().next()
    }

    /// Loads every dataset of the snapshot that can be read. A category that
    /// is absent or unreadable comes back as `None`.
    pub async fn load_snapshot(&self, snapshot_id: &str) -> Result<SnapshotData> {
        validate_snapshot_id(snapshot_id)?;

        Ok(SnapshotData {
            repositories: self.load_dataset(snapshot_id).await,
            commits: self.load_dataset(snapshot_id).await,
            pull_requests: self.load_dataset(snapshot_id).await,
        })
    }

    /// The newest snapshot with its data, if any exists.
    pub async fn load_latest(&self) -> Result<Option<(SnapshotMetadata, SnapshotData)>> {
        let Some(latest) = self.get_latest_snapshot().await else {
            tracing::warn!("No snapshots available");
            return Ok(None);
        };
        let data = self.load_snapshot(&latest.snapshot_id).await?;
        Ok(Some((latest, data)))
    }

    async fn load_dataset<D: Dataset>(&self, snapshot_id: &str) -> Option<Vec<D>> {
        let raw = match self.backend.get_bytes(&key(snapshot_id, D::FILE_NAME)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(
                    "Could not read {} of {}: {}",
                    D::FILE_NAME,
                    snapshot_id,
                    e
                );
                return None;
            }
        };

        match columnar::decode(raw) {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!("Could not decode {} of {}: {}", D::FILE_NAME, snapshot_id, e);
                None
            }
        }
    }

    /// Removes the snapshot. Returns `false` instead of failing.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> bool {
        let result = match validate_snapshot_id(snapshot_id) {
            Ok(()) => self.backend.delete_prefix(snapshot_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(removed) => {
                tracing::info!("Snapshot {} deleted ({} objects)", snapshot_id, removed);
                true
            }
            Err(e) => {
                tracing::error!("Error deleting snapshot {}: {}", snapshot_id, e);
                false
            }
        }
    }
}
