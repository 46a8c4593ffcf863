use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured repository. `last_updated` is when a collection run last
/// touched it, not when its code last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub repo_name: String,
    pub last_updated: DateTime<Utc>,
}

impl Repository {
    pub fn touched_now(repo_name: &str) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            last_updated: Utc::now(),
        }
    }
}
