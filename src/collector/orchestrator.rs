use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collector::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::collector::progress::{Progress, ProgressKind};
use crate::error::{Error, Result};
use crate::github::fetcher::{Checkpoints, Fetcher, Outcome};
use crate::github::rate_budget::{RateBudget, DEFAULT_MAX_WAIT, DEFAULT_SAFETY_THRESHOLD};
use crate::github::HostingApi;
use crate::models::{Commit, PullRequest, Repository};
use crate::storage::SnapshotStore;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// `owner/name` entries, processed in this order.
    pub repositories: Vec<String>,
    pub rate_limit_threshold: u32,
    pub rate_limit_max_wait: Duration,
    pub checkpoints: Checkpoints,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            rate_limit_threshold: DEFAULT_SAFETY_THRESHOLD,
            rate_limit_max_wait: DEFAULT_MAX_WAIT,
            checkpoints: Checkpoints::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

struct RepositorySummary {
    commits: usize,
    pull_requests: usize,
    budget_unavailable: bool,
}

#[derive(Default)]
struct Accumulated {
    repositories: Vec<Repository>,
    commits: Vec<Commit>,
    pull_requests: Vec<PullRequest>,
}

/// Drives one collection run over every configured repository and turns the
/// result into a single snapshot.
pub struct Collector {
    api: Arc<dyn HostingApi>,
    store: Arc<SnapshotStore>,
    config: CollectorConfig,
    cancel: CancellationToken,
    state: RunState,
}

impl Collector {
    pub fn new(api: Arc<dyn HostingApi>, store: Arc<SnapshotStore>, config: CollectorConfig) -> Self {
        Self {
            api,
            store,
            config,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    /// Uses an externally owned token, e.g. one wired to a signal handler.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run cooperatively. A cancelled run still writes
    /// a snapshot of what it gathered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Collects every repository and writes one snapshot.
    ///
    /// Returns `Ok(None)` when no repositories are configured and
    /// `Err(Error::CircuitOpen)` when a systemic failure aborted the run, in
    /// which case nothing is written.
    pub async fn collect_all<F>(&mut self, mut progress: F) -> Result<Option<String>>
    where
        F: FnMut(&Progress),
    {
        if self.state != RunState::Idle {
            return Err(Error::RunFinished);
        }

        if self.config.repositories.is_empty() {
            tracing::warn!("No repositories configured");
            self.state = RunState::Completed;
            return Ok(None);
        }

        self.state = RunState::Running;
        let total = self.config.repositories.len();
        tracing::info!("Starting data collection for {} repositories", total);

        let budget = RateBudget::new(
            self.config.rate_limit_threshold,
            self.config.rate_limit_max_wait,
        );
        let mut fetcher = Fetcher::new(Arc::clone(&self.api), budget, self.cancel.clone())
            .with_checkpoints(self.config.checkpoints);
        let mut breaker = CircuitBreaker::new(self.config.circuit_breaker.clone());
        let mut acc = Accumulated::default();

        for (i, repo_name) in self.config.repositories.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!("Collection cancelled before {}", repo_name);
                break;
            }

            progress(&Progress::new(
                i,
                total,
                ProgressKind::Started,
                format!("Processing: {}", repo_name),
            ));
            tracing::info!("Processing repository: {}", repo_name);

            match Self::collect_repository(&mut fetcher, repo_name, &mut acc).await {
                Ok(summary) => {
                    // A category stopped on unknown quota says nothing about
                    // the repository, so the failure streak is left alone.
                    if !summary.budget_unavailable {
                        breaker.record_success();
                    }
                    let suffix = if self.cancel.is_cancelled() {
                        " (cancelled)"
                    } else if summary.budget_unavailable {
                        " (rate limit unknown)"
                    } else {
                        ""
                    };
                    progress(&Progress::new(
                        i + 1,
                        total,
                        ProgressKind::Finished,
                        format!(
                            "{}: {} commits, {} pull requests{}",
                            repo_name, summary.commits, summary.pull_requests, suffix
                        ),
                    ));
                }
                Err(e) => {
                    tracing::error!("Error processing repository {}: {}", repo_name, e);

                    if breaker.record_failure(e.class()) {
                        progress(&Progress::new(
                            i + 1,
                            total,
                            ProgressKind::Aborted,
                            format!("Collection aborted: {}", e),
                        ));
                        self.state = RunState::Aborted;
                        return Err(Error::CircuitOpen {
                            repository: repo_name.clone(),
                            source: Box::new(e),
                        });
                    }

                    progress(&Progress::new(
                        i + 1,
                        total,
                        ProgressKind::Failed,
                        format!("{}: {}", repo_name, e),
                    ));
                }
            }
        }

        if self.cancel.is_cancelled() {
            tracing::info!("Collection stopped at user request, saving partial data");
        }

        progress(&Progress::new(
            total,
            total,
            ProgressKind::Snapshotting,
            format!("Creating snapshot in {}", self.store.backend().describe()),
        ));

        let snapshot_id = match self
            .store
            .create_snapshot(&acc.repositories, &acc.commits, &acc.pull_requests)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Error creating snapshot: {}", e);
                self.state = RunState::Aborted;
                return Err(e);
            }
        };

        tracing::info!(
            "Data collection completed. Created snapshot: {}",
            snapshot_id
        );
        tracing::info!(
            "Total: {} repos, {} commits, {} PRs",
            acc.repositories.len(),
            acc.commits.len(),
            acc.pull_requests.len()
        );

        progress(&Progress::new(
            total,
            total,
            ProgressKind::Completed,
            format!("Snapshot created: {}", snapshot_id),
        ));
        self.state = RunState::Completed;

        Ok(Some(snapshot_id))
    }

    /// Fetches commits, then pull requests. Items fetched before a failure
    /// stay in the accumulators; the failure skips the rest of the repository.
    async fn collect_repository(
        fetcher: &mut Fetcher,
        repo_name: &str,
        acc: &mut Accumulated,
    ) -> Result<RepositorySummary> {
        acc.repositories.push(Repository::touched_now(repo_name));

        let commits = fetcher.get_commits(repo_name).await;
        let commit_count = commits.items.len();
        acc.commits.extend(commits.items);
        tracing::info!("Collected {} commits from {}", commit_count, repo_name);
        let mut budget_unavailable = match commits.outcome {
            Outcome::Failed(e) => return Err(e),
            outcome => matches!(outcome, Outcome::BudgetUnavailable),
        };

        let pulls = fetcher.get_pull_requests(repo_name).await;
        let pull_count = pulls.items.len();
        acc.pull_requests.extend(pulls.items);
        tracing::info!("Collected {} pull requests from {}", pull_count, repo_name);
        match pulls.outcome {
            Outcome::Failed(e) => return Err(e),
            Outcome::BudgetUnavailable => budget_unavailable = true,
            Outcome::Complete | Outcome::Cancelled => {}
        }

        Ok(RepositorySummary {
            commits: commit_count,
            pull_requests: pull_count,
            budget_unavailable,
        })
    }
}
