use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::github::api::{
    ApiError, ApiResult, CommitRecord, HostingApi, PullRequestRecord, RepoHandle,
};
use crate::github::rate_budget::{BudgetStatus, RateBudget};
use crate::models::{Commit, PullRequest};

/// How often (in produced items) cancellation and the rate budget are checked.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoints {
    pub commits: usize,
    pub pull_requests: usize,
}

impl Default for Checkpoints {
    fn default() -> Self {
        Self {
            commits: 50,
            pull_requests: 20,
        }
    }
}

/// Why an enumeration stopped.
#[derive(Debug)]
pub enum Outcome {
    Complete,
    Cancelled,
    /// Quota could not be read, so enumeration stopped rather than risk
    /// running the budget dry.
    BudgetUnavailable,
    Failed(Error),
}

/// Items produced for one repository and category. Items gathered before a
/// failure or cancellation are kept.
#[derive(Debug)]
pub struct Enumeration<T> {
    pub items: Vec<T>,
    pub outcome: Outcome,
}

impl<T> Enumeration<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, Outcome::Complete)
    }
}

/// One kind of record the fetcher can enumerate.
trait Category {
    type Record: Send;
    type Item;

    const LABEL: &'static str;

    fn open<'a>(
        api: &'a dyn HostingApi,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<Self::Record>>;

    fn checkpoint(checkpoints: &Checkpoints) -> usize;

    fn convert(record: Self::Record, repo_name: &str) -> Self::Item;
}

struct Commits;

impl Category for Commits {
    type Record = CommitRecord;
    type Item = Commit;

    const LABEL: &'static str = "commits";

    fn open<'a>(
        api: &'a dyn HostingApi,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<CommitRecord>> {
        api.commits(repo)
    }

    fn checkpoint(checkpoints: &Checkpoints) -> usize {
        checkpoints.commits
    }

    fn convert(record: CommitRecord, repo_name: &str) -> Commit {
        Commit::from_record(record, repo_name)
    }
}

struct PullRequests;

impl Category for PullRequests {
    type Record = PullRequestRecord;
    type Item = PullRequest;

    const LABEL: &'static str = "pull requests";

    fn open<'a>(
        api: &'a dyn HostingApi,
        repo: &'a RepoHandle,
    ) -> BoxStream<'a, ApiResult<PullRequestRecord>> {
        api.pull_requests(repo)
    }

    fn checkpoint(checkpoints: &Checkpoints) -> usize {
        checkpoints.pull_requests
    }

    fn convert(record: PullRequestRecord, repo_name: &str) -> PullRequest {
        PullRequest::from_record(record, repo_name)
    }
}

/// Per-repository enumeration under the shared rate budget.
pub struct Fetcher {
    api: Arc<dyn HostingApi>,
    budget: RateBudget,
    cancel: CancellationToken,
    checkpoints: Checkpoints,
}

impl Fetcher {
    pub fn new(api: Arc<dyn HostingApi>, budget: RateBudget, cancel: CancellationToken) -> Self {
        Self {
            api,
            budget,
            cancel,
            checkpoints: Checkpoints::default(),
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Checkpoints) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }

    pub async fn get_commits(&mut self, repo_name: &str) -> Enumeration<Commit> {
        self.enumerate::<Commits>(repo_name).await
    }

    /// Pull requests newest first.
    pub async fn get_pull_requests(&mut self, repo_name: &str) -> Enumeration<PullRequest> {
        self.enumerate::<PullRequests>(repo_name).await
    }

    /// Runs the enumeration, restarting it from scratch once after an
    /// explicit rate-limit error.
    async fn enumerate<C: Category>(&mut self, repo_name: &str) -> Enumeration<C::Item> {
        let mut items = Vec::new();
        let mut retried = false;

        loop {
            let outcome = match self.enumerate_once::<C>(repo_name, &mut items).await {
                Ok(outcome) => outcome,
                Err(Error::Api(ApiError::RateLimited { reset_at })) if !retried => {
                    tracing::warn!(
                        "Rate limit exceeded while fetching {} from {}",
                        C::LABEL,
                        repo_name
                    );
                    retried = true;
                    if let Some(reset_at) = reset_at {
                        if self.budget.wait_for_reset(reset_at, &self.cancel).await
                            == BudgetStatus::Cancelled
                        {
                            Outcome::Cancelled
                        } else {
                            items.clear();
                            continue;
                        }
                    } else {
                        match self.budget.ensure_available(self.api.as_ref(), &self.cancel).await {
                            Ok(BudgetStatus::Cancelled) => Outcome::Cancelled,
                            Ok(BudgetStatus::Unavailable) => Outcome::BudgetUnavailable,
                            Ok(_) => {
                                items.clear();
                                continue;
                            }
                            Err(e) => Outcome::Failed(e.into()),
                        }
                    }
                }
                Err(e) => Outcome::Failed(e),
            };

            match &outcome {
                Outcome::Complete => {
                    tracing::debug!("Fetched {} {} from {}", items.len(), C::LABEL, repo_name)
                }
                Outcome::Cancelled => tracing::info!(
                    "Stopped collecting {} from {} at user request ({} kept)",
                    C::LABEL,
                    repo_name,
                    items.len()
                ),
                Outcome::BudgetUnavailable => tracing::warn!(
                    "Stopped collecting {} from {}: rate limit unknown ({} kept)",
                    C::LABEL,
                    repo_name,
                    items.len()
                ),
                Outcome::Failed(e) => tracing::error!(
                    "Error fetching {} from {}: {}",
                    C::LABEL,
                    repo_name,
                    e
                ),
            }

            return Enumeration { items, outcome };
        }
    }

    async fn enumerate_once<C: Category>(
        &mut self,
        repo_name: &str,
        items: &mut Vec<C::Item>,
    ) -> Result<Outcome> {
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        if let Some(stop) = self.consult_budget().await? {
            return Ok(stop);
        }

        let api = Arc::clone(&self.api);
        let handle = match api.get_repository(repo_name).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::info!("Repository {} not found or not accessible", repo_name);
                return Err(Error::RepoNotFound(repo_name.to_string()));
            }
            Err(ApiError::EmptyRepository) => {
                tracing::warn!("Repository {} is empty", repo_name);
                return Ok(Outcome::Complete);
            }
            Err(e) => return Err(e.into()),
        };

        let checkpoint = C::checkpoint(&self.checkpoints).max(1);
        let mut stream = C::open(api.as_ref(), &handle);

        while let Some(next) = stream.next().await {
            match next {
                Ok(record) => {
                    items.push(C::convert(record, repo_name));
                }
                Err(ApiError::MalformedItem(reason)) => {
                    tracing::warn!(
                        "Skipping malformed item in {} from {}: {}",
                        C::LABEL,
                        repo_name,
                        reason
                    );
                    continue;
                }
                Err(ApiError::EmptyRepository) => {
                    tracing::warn!("Repository {} is empty", repo_name);
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if items.len() % checkpoint == 0 {
                if self.cancel.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
                if let Some(stop) = self.consult_budget().await? {
                    return Ok(stop);
                }
            }
        }

        Ok(Outcome::Complete)
    }

    /// `Some(outcome)` when enumeration has to stop here.
    async fn consult_budget(&mut self) -> Result<Option<Outcome>> {
        match self
            .budget
            .ensure_available(self.api.as_ref(), &self.cancel)
            .await?
        {
            BudgetStatus::Ready | BudgetStatus::Waited(_) => Ok(None),
            BudgetStatus::Cancelled => Ok(Some(Outcome::Cancelled)),
            BudgetStatus::Unavailable => Ok(Some(Outcome::BudgetUnavailable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::mock::{self, MockApi};
    use crate::github::RateLimit;
    use chrono::Utc;

    fn fetcher(api: Arc<MockApi>, cancel: CancellationToken) -> Fetcher {
        Fetcher::new(api, RateBudget::default(), cancel)
    }

    #[tokio::test]
    async fn test_fetches_all_commits_in_order() {
        let api = Arc::new(MockApi::new().with_repo("o/a", mock::commits("o/a", 120), vec![]));
        let mut fetcher = fetcher(api.clone(), CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        assert!(result.is_complete());
        assert_eq!(result.items.len(), 120);
        assert_eq!(result.items[0].sha, format!("{:040x}", 0));
        assert_eq!(result.items[0].repo_name, "o/a");
        // start + checkpoints at 50 and 100
        assert_eq!(api.rate_limit_calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_items_are_skipped() {
        let mut run = mock::commits("o/a", 3);
        run.insert(1, Err(ApiError::MalformedItem("missing field `sha`".into())));
        let api = Arc::new(MockApi::new().with_repo("o/a", run, vec![]));
        let mut fetcher = fetcher(api, CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        assert!(result.is_complete());
        assert_eq!(result.items.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_repository_is_not_an_error() {
        let api = Arc::new(
            MockApi::new().with_repo("o/empty", vec![Err(ApiError::EmptyRepository)], vec![]),
        );
        let mut fetcher = fetcher(api, CancellationToken::new());

        let commits = fetcher.get_commits("o/empty").await;
        assert!(commits.is_complete());
        assert!(commits.items.is_empty());

        let pulls = fetcher.get_pull_requests("o/empty").await;
        assert!(pulls.is_complete());
        assert!(pulls.items.is_empty());
    }

    #[tokio::test]
    async fn test_missing_repository_fails_the_category() {
        let api = Arc::new(MockApi::new());
        let mut fetcher = fetcher(api, CancellationToken::new());

        let result = fetcher.get_commits("o/missing").await;
        assert!(matches!(result.outcome, Outcome::Failed(Error::RepoNotFound(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_restarts_enumeration_once() {
        let mut first = mock::commits("o/a", 10);
        first.push(Err(ApiError::RateLimited { reset_at: None }));
        let api = Arc::new(MockApi::new().with_runs(
            "o/a",
            vec![first, mock::commits("o/a", 25)],
            vec![],
        ));
        let mut fetcher = fetcher(api.clone(), CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        assert!(result.is_complete());
        // restarted from scratch, nothing from the first attempt survives
        assert_eq!(result.items.len(), 25);
        assert_eq!(api.commit_calls("o/a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_reported_reset() {
        let mut first = mock::commits("o/a", 2);
        first.push(Err(ApiError::RateLimited {
            reset_at: Some(Utc::now() + chrono::Duration::seconds(30)),
        }));
        let api = Arc::new(MockApi::new().with_runs(
            "o/a",
            vec![first, mock::commits("o/a", 4)],
            vec![],
        ));
        let mut fetcher = fetcher(api, CancellationToken::new());

        let started = tokio::time::Instant::now();
        let result = fetcher.get_commits("o/a").await;
        assert!(result.is_complete());
        assert_eq!(result.items.len(), 4);
        assert!(started.elapsed() >= std::time::Duration::from_secs(25));
    }

    #[tokio::test]
    async fn test_second_rate_limit_fails_the_category() {
        let mut limited = mock::commits("o/a", 3);
        limited.push(Err(ApiError::RateLimited { reset_at: None }));
        let api = Arc::new(MockApi::new().with_runs("o/a", vec![limited], vec![]));
        let mut fetcher = fetcher(api.clone(), CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        assert!(matches!(
            result.outcome,
            Outcome::Failed(Error::Api(ApiError::RateLimited { .. }))
        ));
        assert_eq!(result.items.len(), 3);
        assert_eq!(api.commit_calls("o/a"), 2);
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_checkpoint() {
        let cancel = CancellationToken::new();
        let api = Arc::new(
            MockApi::new()
                .with_repo("o/a", mock::commits("o/a", 200), vec![])
                .with_cancel_after(cancel.clone(), 10),
        );
        let mut fetcher = fetcher(api, cancel);

        let result = fetcher.get_commits("o/a").await;
        assert!(matches!(result.outcome, Outcome::Cancelled));
        assert_eq!(result.items.len(), 50);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let api = Arc::new(MockApi::new().with_repo("o/a", mock::commits("o/a", 5), vec![]));
        let mut fetcher = fetcher(api.clone(), cancel);

        let result = fetcher.get_pull_requests("o/a").await;
        assert!(matches!(result.outcome, Outcome::Cancelled));
        assert!(result.items.is_empty());
        assert_eq!(api.pull_calls("o/a"), 0);
    }

    #[tokio::test]
    async fn test_pull_requests_keep_api_order() {
        let api = Arc::new(MockApi::new().with_repo("o/a", vec![], mock::pull_requests("o/a", 45)));
        let mut fetcher = fetcher(api.clone(), CancellationToken::new());

        let result = fetcher.get_pull_requests("o/a").await;
        assert!(result.is_complete());
        let numbers: Vec<u64> = result.items.iter().map(|pr| pr.number).collect();
        assert_eq!(numbers.first(), Some(&45));
        assert_eq!(numbers.last(), Some(&1));
        // start + checkpoints at 20 and 40
        assert_eq!(api.rate_limit_calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_budget_stops_with_partial_items() {
        let api = Arc::new(
            MockApi::new()
                .with_repo("o/a", mock::commits("o/a", 80), vec![])
                .with_rate_limits(vec![
                    Ok(RateLimit {
                        remaining: 4000,
                        limit: 5000,
                        reset_at: None,
                    }),
                    Err(ApiError::Http {
                        status: 503,
                        message: "unavailable".into(),
                    }),
                ]),
        );
        let mut fetcher = fetcher(api, CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        assert!(matches!(result.outcome, Outcome::BudgetUnavailable));
        assert_eq!(result.items.len(), 50);
    }

    #[tokio::test]
    async fn test_quota_timeout_fails_the_category() {
        let api = Arc::new(
            MockApi::new()
                .with_repo("o/a", mock::commits("o/a", 5), vec![])
                .with_rate_limits(vec![Err(ApiError::Timeout("rate_limit".into()))]),
        );
        let mut fetcher = fetcher(api.clone(), CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        match result.outcome {
            Outcome::Failed(err) => assert_eq!(err.class(), crate::github::ErrorClass::Timeout),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(result.items.is_empty());
        assert_eq!(api.commit_calls("o/a"), 0);
    }

    #[tokio::test]
    async fn test_systemic_lookup_failure_is_reported() {
        let api = Arc::new(
            MockApi::new()
                .with_repo("o/a", mock::commits("o/a", 5), vec![])
                .with_lookup_error("o/a", ApiError::Unauthorized("bad credentials".into())),
        );
        let mut fetcher = fetcher(api, CancellationToken::new());

        let result = fetcher.get_commits("o/a").await;
        match result.outcome {
            Outcome::Failed(err) => assert!(err.api_error().unwrap().is_systemic()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
