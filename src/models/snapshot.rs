use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{Commit, PullRequest, Repository};

pub const SNAPSHOT_PREFIX: &str = "snapshot_";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Denormalized counts stored next to the datasets so listing never has to
/// read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: String,
    pub repositories_count: usize,
    pub commits_count: usize,
    pub pull_requests_count: usize,
    pub snapshot_id: String,
}

impl SnapshotMetadata {
    /// Collection time, if the timestamp is in the canonical format.
    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// Contents of a loaded snapshot. `None` means the dataset is absent, which
/// readers treat as zero rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotData {
    pub repositories: Option<Vec<Repository>>,
    pub commits: Option<Vec<Commit>>,
    pub pull_requests: Option<Vec<PullRequest>>,
}

impl SnapshotData {
    pub fn repositories_count(&self) -> usize {
        self.repositories.as_ref().map_or(0, Vec::len)
    }

    pub fn commits_count(&self) -> usize {
        self.commits.as_ref().map_or(0, Vec::len)
    }

    pub fn pull_requests_count(&self) -> usize {
        self.pull_requests.as_ref().map_or(0, Vec::len)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn snapshot_id_for(timestamp: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, timestamp)
}
