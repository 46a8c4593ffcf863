pub mod config;
pub mod error;
pub mod models;
pub mod github;
pub mod storage;
pub mod collector;

pub use config::{Config, StorageConfig};
pub use error::{Error, Result};
pub use github::{GitHubClient, HostingApi};
pub use collector::{Collector, CollectorConfig, Progress, ProgressKind, RunState};
pub use storage::{SnapshotStore, StorageBackend};
