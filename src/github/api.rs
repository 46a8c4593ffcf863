use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by the hosting API.
///
/// `MalformedItem` is an item-level condition: a stream that yields it keeps
/// going. Every other variant ends the enumeration that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("Git Repository is empty")]
    EmptyRepository,

    #[error("rate limit exceeded (resets at {})", fmt_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed item: {0}")]
    MalformedItem(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

fn fmt_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Unauthorized(_) => ErrorClass::Authorization,
            ApiError::Connection(_) => ErrorClass::Connectivity,
            ApiError::Timeout(_) => ErrorClass::Timeout,
            ApiError::RateLimited { .. } => ErrorClass::RateLimit,
            ApiError::NotFound(_) => ErrorClass::NotFound,
            ApiError::EmptyRepository
            | ApiError::MalformedItem(_)
            | ApiError::Http { .. } => ErrorClass::Other,
        }
    }

    /// Authorization and connectivity failures say nothing about a single
    /// repository; they are never masked as "quota unknown".
    pub fn is_systemic(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Authorization | ErrorClass::Connectivity
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authorization,
    Connectivity,
    Timeout,
    RateLimit,
    NotFound,
    Other,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Authorization => "authorization",
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::Timeout => "timeout",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Other => "other",
        };
        f.write_str(name)
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "authorization" | "auth" => Ok(ErrorClass::Authorization),
            "connectivity" | "connection" => Ok(ErrorClass::Connectivity),
            "timeout" => Ok(ErrorClass::Timeout),
            "rate_limit" | "ratelimit" => Ok(ErrorClass::RateLimit),
            "not_found" | "notfound" => Ok(ErrorClass::NotFound),
            "other" => Ok(ErrorClass::Other),
            other => Err(format!("unknown error class: {}", other)),
        }
    }
}

/// Handle to a repository that exists on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub full_name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: Option<DateTime<Utc>>,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRecord {
    pub number: u64,
    pub title: String,
    pub author_login: String,
    pub author_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub state: String,
    pub comment_count: u32,
    pub review_comment_count: u32,
    pub commit_shas: Vec<String>,
    pub web_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

/// The remote hosting API as seen by the collector.
///
/// Enumerations are lazy: pages are only requested as the stream is polled.
#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn get_repository(&self, name: &str) -> ApiResult<Option<RepoHandle>>;

    /// Commits in the API's native order.
    fn commits<'a>(&'a self, repo: &'a RepoHandle) -> BoxStream<'a, ApiResult<CommitRecord>>;

    /// Pull requests in every state, newest first.
    fn pull_requests<'a>(
        &'a self,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<PullRequestRecord>>;

    async fn rate_limit(&self) -> ApiResult<RateLimit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_parsing() {
        assert_eq!("authorization".parse::<ErrorClass>(), Ok(ErrorClass::Authorization));
        assert_eq!(" Connectivity ".parse::<ErrorClass>(), Ok(ErrorClass::Connectivity));
        assert_eq!("rate_limit".parse::<ErrorClass>(), Ok(ErrorClass::RateLimit));
        assert!("bogus".parse::<ErrorClass>().is_err());
    }

    #[test]
    fn test_systemic_errors() {
        assert!(ApiError::Unauthorized("bad token".into()).is_systemic());
        assert!(ApiError::Connection("refused".into()).is_systemic());
        assert!(!ApiError::Timeout("slow".into()).is_systemic());
        assert!(!ApiError::RateLimited { reset_at: None }.is_systemic());
        assert!(!ApiError::NotFound("x/y".into()).is_systemic());
    }
}
