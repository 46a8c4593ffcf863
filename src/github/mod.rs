pub mod api;
pub mod client;
pub mod fetcher;
pub mod paginator;
pub mod rate_budget;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
pub(crate) mod stub;

pub use api::{
    ApiError, ApiResult, CommitRecord, ErrorClass, HostingApi, PullRequestRecord, RateLimit,
    RepoHandle,
};
pub use client::GitHubClient;
pub use fetcher::{Checkpoints, Enumeration, Fetcher, Outcome};
pub use paginator::Paginator;
pub use rate_budget::{BudgetStatus, RateBudget};
