use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, Client};
use serde::Deserialize;

use crate::error::Result;
use crate::github::api::{
    ApiError, ApiResult, CommitRecord, HostingApi, PullRequestRecord, RateLimit, RepoHandle,
};
use crate::github::paginator::{check_response, epoch_to_utc, Paginator};

const PER_PAGE: u32 = 100;

/// `HostingApi` over the GitHub REST v3 API.
pub struct GitHubClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GhRepository {
    full_name: String,
    html_url: String,
}

#[derive(Deserialize)]
struct GhCommit {
    sha: String,
    html_url: String,
    commit: GhCommitDetails,
}

#[derive(Deserialize)]
struct GhCommitDetails {
    message: String,
    author: Option<GhCommitAuthor>,
}

#[derive(Deserialize)]
struct GhCommitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct GhPullRequest {
    number: u64,
    title: String,
    user: GhUser,
    created_at: Option<DateTime<Utc>>,
    state: String,
    html_url: String,
    // Only present on the single pull request endpoint.
    #[serde(default)]
    comments: Option<u32>,
    #[serde(default)]
    review_comments: Option<u32>,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct GhPullCommit {
    sha: String,
}

#[derive(Deserialize)]
struct GhRateLimitResponse {
    resources: GhRateResources,
}

#[derive(Deserialize)]
struct GhRateResources {
    core: GhRate,
}

#[derive(Deserialize)]
struct GhRate {
    limit: u32,
    remaining: u32,
    reset: u64,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("reposnap/0.1"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
        })
    }

    /// Points the client at a GitHub Enterprise API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        tracing::debug!("Fetching: {}", url);
        let response = check_response(self.client.get(url).send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::MalformedItem(format!("{}: {}", url, e)))
    }

    /// The list endpoint omits comment counts and commits, so each pull
    /// request is completed with two more calls.
    async fn expand_pull_request(
        &self,
        repo: &RepoHandle,
        summary: GhPullRequest,
    ) -> ApiResult<PullRequestRecord> {
        let detail_url = format!(
            "{}/repos/{}/pulls/{}",
            self.base_url, repo.full_name, summary.number
        );
        let detail: GhPullRequest = self.get_json(&detail_url).await?;

        let commit_shas: Vec<String> = Paginator::new(self.client.clone(), PER_PAGE)
            .items::<GhPullCommit>(format!("{}/commits", detail_url))
            .map_ok(|c| c.sha)
            .try_collect()
            .await?;

        Ok(PullRequestRecord {
            number: summary.number,
            title: summary.title,
            author_email: summary.user.email.or(detail.user.email),
            author_login: summary.user.login,
            created_at: summary.created_at,
            state: summary.state,
            comment_count: detail.comments.unwrap_or(0),
            review_comment_count: detail.review_comments.unwrap_or(0),
            commit_shas,
            web_url: summary.html_url,
        })
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn get_repository(&self, name: &str) -> ApiResult<Option<RepoHandle>> {
        let url = format!("{}/repos/{}", self.base_url, name);
        tracing::info!("Fetching repository: {}", name);

        match self.get_json::<GhRepository>(&url).await {
            Ok(repo) => Ok(Some(RepoHandle {
                full_name: repo.full_name,
                html_url: repo.html_url,
            })),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn commits<'a>(&'a self, repo: &'a RepoHandle) -> BoxStream<'a, ApiResult<CommitRecord>> {
        let url = format!("{}/repos/{}/commits", self.base_url, repo.full_name);
        tracing::debug!("Fetching commits for: {}", repo.full_name);

        Paginator::new(self.client.clone(), PER_PAGE)
            .items::<GhCommit>(url)
            .map_ok(|c| {
                let author = c.commit.author;
                CommitRecord {
                    sha: c.sha,
                    message: c.commit.message,
                    author_name: author
                        .as_ref()
                        .and_then(|a| a.name.clone())
                        .unwrap_or_default(),
                    author_email: author
                        .as_ref()
                        .and_then(|a| a.email.clone())
                        .unwrap_or_default(),
                    author_date: author.and_then(|a| a.date),
                    web_url: c.html_url,
                }
            })
            .boxed()
    }

    fn pull_requests<'a>(
        &'a self,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<PullRequestRecord>> {
        let url = format!(
            "{}/repos/{}/pulls?state=all&sort=created&direction=desc",
            self.base_url, repo.full_name
        );
        tracing::debug!("Fetching pull requests for: {}", repo.full_name);

        Paginator::new(self.client.clone(), PER_PAGE)
            .items::<GhPullRequest>(url)
            .and_then(move |summary| async move {
                let number = summary.number;
                self.expand_pull_request(repo, summary)
                    .await
                    .map_err(|e| skip_pull_request(e, &repo.full_name, number))
            })
            .boxed()
    }

    async fn rate_limit(&self) -> ApiResult<RateLimit> {
        let url = format!("{}/rate_limit", self.base_url);
        let body: GhRateLimitResponse = self.get_json(&url).await?;
        let core = body.resources.core;

        Ok(RateLimit {
            remaining: core.remaining,
            limit: core.limit,
            reset_at: epoch_to_utc(core.reset),
        })
    }
}

/// A failed detail or commits call costs only that pull request, unless the
/// failure concerns the whole API.
fn skip_pull_request(err: ApiError, repo: &str, number: u64) -> ApiError {
    match err {
        ApiError::RateLimited { .. }
        | ApiError::Unauthorized(_)
        | ApiError::Connection(_)
        | ApiError::MalformedItem(_) => err,
        other => {
            tracing::warn!(
                "Error expanding pull request #{} in {}: {}",
                number,
                repo,
                other
            );
            ApiError::MalformedItem(format!("pull request #{}: {}", number, other))
        }
    }
}
