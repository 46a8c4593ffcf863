//! Scripted `HostingApi` used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::github::api::{
    ApiError, ApiResult, CommitRecord, HostingApi, PullRequestRecord, RateLimit, RepoHandle,
};

type Runs<T> = VecDeque<Vec<ApiResult<T>>>;

#[derive(Default)]
struct MockRepo {
    commit_runs: Runs<CommitRecord>,
    pull_runs: Runs<PullRequestRecord>,
    commit_calls: usize,
    pull_calls: usize,
}

#[derive(Default)]
pub struct MockApi {
    repos: Mutex<HashMap<String, MockRepo>>,
    lookup_errors: HashMap<String, ApiError>,
    rate_limits: Mutex<VecDeque<ApiResult<RateLimit>>>,
    cancel_after: Option<(CancellationToken, usize)>,
    rate_limit_calls: AtomicUsize,
}

pub fn commit(repo: &str, sha: &str) -> CommitRecord {
    CommitRecord {
        sha: sha.to_string(),
        message: format!("commit {}", sha),
        author_name: "Ada".to_string(),
        author_email: "ada@example.com".to_string(),
        author_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single(),
        web_url: format!("https://github.com/{}/commit/{}", repo, sha),
    }
}

pub fn commits(repo: &str, count: usize) -> Vec<ApiResult<CommitRecord>> {
    (0..count)
        .map(|i| Ok(commit(repo, &format!("{:040x}", i))))
        .collect()
}

pub fn pull_request(repo: &str, number: u64) -> PullRequestRecord {
    PullRequestRecord {
        number,
        title: format!("PR {}", number),
        author_login: "octocat".to_string(),
        author_email: None,
        created_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).single(),
        state: "open".to_string(),
        comment_count: 2,
        review_comment_count: 1,
        commit_shas: vec![format!("{:040x}", number)],
        web_url: format!("https://github.com/{}/pull/{}", repo, number),
    }
}

pub fn pull_requests(repo: &str, count: u64) -> Vec<ApiResult<PullRequestRecord>> {
    (1..=count).rev().map(|n| Ok(pull_request(repo, n))).collect()
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(
        self,
        name: &str,
        commits: Vec<ApiResult<CommitRecord>>,
        pulls: Vec<ApiResult<PullRequestRecord>>,
    ) -> Self {
        self.with_runs(name, vec![commits], vec![pulls])
    }

    /// Each enumeration call consumes the next run; the last run repeats.
    pub fn with_runs(
        self,
        name: &str,
        commit_runs: Vec<Vec<ApiResult<CommitRecord>>>,
        pull_runs: Vec<Vec<ApiResult<PullRequestRecord>>>,
    ) -> Self {
        self.repos.lock().unwrap().insert(
            name.to_string(),
            MockRepo {
                commit_runs: commit_runs.into(),
                pull_runs: pull_runs.into(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_lookup_error(mut self, name: &str, error: ApiError) -> Self {
        self.lookup_errors.insert(name.to_string(), error);
        self
    }

    /// Quota reports handed out in order; afterwards the budget is full.
    pub fn with_rate_limits(self, limits: Vec<ApiResult<RateLimit>>) -> Self {
        *self.rate_limits.lock().unwrap() = limits.into();
        self
    }

    /// Cancels `token` once `after` commits have been yielded.
    pub fn with_cancel_after(mut self, token: CancellationToken, after: usize) -> Self {
        self.cancel_after = Some((token, after));
        self
    }

    pub fn commit_calls(&self, name: &str) -> usize {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.commit_calls)
            .unwrap_or(0)
    }

    pub fn pull_calls(&self, name: &str) -> usize {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .map(|r| r.pull_calls)
            .unwrap_or(0)
    }

    pub fn rate_limit_calls(&self) -> usize {
        self.rate_limit_calls.load(Ordering::SeqCst)
    }

    fn next_run<T: Clone>(runs: &mut Runs<T>) -> Vec<ApiResult<T>> {
        if runs.len() > 1 {
            runs.pop_front().unwrap_or_default()
        } else {
            runs.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl HostingApi for MockApi {
    async fn get_repository(&self, name: &str) -> ApiResult<Option<RepoHandle>> {
        if let Some(err) = self.lookup_errors.get(name) {
            return Err(err.clone());
        }
        let exists = self.repos.lock().unwrap().contains_key(name);
        Ok(exists.then(|| RepoHandle {
            full_name: name.to_string(),
            html_url: format!("https://github.com/{}", name),
        }))
    }

    fn commits<'a>(&'a self, repo: &'a RepoHandle) -> BoxStream<'a, ApiResult<CommitRecord>> {
        let run = {
            let mut repos = self.repos.lock().unwrap();
            let entry = repos.entry(repo.full_name.clone()).or_default();
            entry.commit_calls += 1;
            Self::next_run(&mut entry.commit_runs)
        };

        let cancel_after = self.cancel_after.clone();
        let mut yielded = 0usize;
        stream::iter(run)
            .inspect(move |_| {
                yielded += 1;
                if let Some((token, after)) = &cancel_after {
                    if yielded == *after {
                        token.cancel();
                    }
                }
            })
            .boxed()
    }

    fn pull_requests<'a>(
        &'a self,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<PullRequestRecord>> {
        let run = {
            let mut repos = self.repos.lock().unwrap();
            let entry = repos.entry(repo.full_name.clone()).or_default();
            entry.pull_calls += 1;
            Self::next_run(&mut entry.pull_runs)
        };
        stream::iter(run).boxed()
    }

    async fn rate_limit(&self) -> ApiResult<RateLimit> {
        self.rate_limit_calls.fetch_add(1, Ordering::SeqCst);
        self.rate_limits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RateLimit {
                remaining: 5000,
                limit: 5000,
                reset_at: None,
            }))
    }
}
