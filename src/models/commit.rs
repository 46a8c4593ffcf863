use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::api::{CommitRecord, PullRequestRecord};

/// A commit as it stood when it was fetched. `sha` is unique per repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: Option<DateTime<Utc>>,
    pub url: String,
    pub repo_name: String,
}

impl Commit {
    pub fn from_record(record: CommitRecord, repo_name: &str) -> Self {
        Self {
            sha: record.sha,
            message: record.message,
            author_name: record.author_name,
            author_email: record.author_email,
            author_date: record.author_date,
            url: record.web_url,
            repo_name: repo_name.to_string(),
        }
    }
}

/// A pull request; `number` is unique per repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub author_login: String,
    pub author_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub state: String,
    pub comments: u32,
    pub review_comments: u32,
    pub commit_shas: Vec<String>,
    pub url: String,
    pub repo_name: String,
}

impl PullRequest {
    pub fn from_record(record: PullRequestRecord, repo_name: &str) -> Self {
        Self {
            number: record.number,
            title: record.title,
            author_login: record.author_login,
            author_email: record.author_email,
            created_at: record.created_at,
            state: record.state,
            comments: record.comment_count,
            review_comments: record.review_comment_count,
            commit_shas: record.commit_shas,
            url: record.web_url,
            repo_name: repo_name.to_string(),
        }
    }
}
