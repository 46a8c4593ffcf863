use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::github::api::{ApiError, ErrorClass, HostingApi, RateLimit};

pub const DEFAULT_SAFETY_THRESHOLD: u32 = 10;
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

/// What happened when the budget was consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Ready,
    Waited(Duration),
    Cancelled,
    /// Quota information could not be obtained; no wait was attempted.
    Unavailable,
}

/// Remaining quota of the shared API budget, refreshed from the API on every
/// consultation.
pub struct RateBudget {
    threshold: u32,
    max_wait: Duration,
    last: Option<RateLimit>,
}

impl RateBudget {
    pub fn new(threshold: u32, max_wait: Duration) -> Self {
        Self {
            threshold,
            max_wait,
            last: None,
        }
    }

    /// The most recent quota report.
    pub fn last(&self) -> Option<RateLimit> {
        self.last
    }

    /// Blocks while the remaining quota is at or below the safety threshold.
    ///
    /// Systemic failures and timeouts are returned as errors so they count
    /// against the repository; any other failure to read the quota yields
    /// `Unavailable`.
    pub async fn ensure_available(
        &mut self,
        api: &dyn HostingApi,
        cancel: &CancellationToken,
    ) -> Result<BudgetStatus, ApiError> {
        let limit = match api.rate_limit().await {
            Ok(limit) => limit,
            Err(e) if e.is_systemic() || e.class() == ErrorClass::Timeout => return Err(e),
            Err(e) => {
                tracing::warn!("Could not get rate limit info: {}", e);
                self.last = None;
                return Ok(BudgetStatus::Unavailable);
            }
        };
        self.last = Some(limit);

        if limit.remaining > self.threshold {
            return Ok(BudgetStatus::Ready);
        }

        match limit.reset_at {
            Some(reset_at) => Ok(self.wait_for_reset(reset_at, cancel).await),
            None => {
                tracing::warn!(
                    "Only {} API calls left and no reset time available",
                    limit.remaining
                );
                Ok(BudgetStatus::Unavailable)
            }
        }
    }

    /// Sleeps until `reset_at`, capped at the maximum wait, or until
    /// cancellation.
    pub async fn wait_for_reset(
        &self,
        reset_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> BudgetStatus {
        let wait = match (reset_at - Utc::now()).to_std() {
            Ok(wait) if !wait.is_zero() => wait.min(self.max_wait),
            _ => return BudgetStatus::Ready,
        };

        tracing::warn!("Rate limit exceeded. Waiting {:.0?}...", wait);
        tokio::select! {
            _ = sleep(wait) => BudgetStatus::Waited(wait),
            _ = cancel.cancelled() => {
                tracing::info!("Rate limit wait interrupted by cancellation");
                BudgetStatus::Cancelled
            }
        }
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_THRESHOLD, DEFAULT_MAX_WAIT)
    }
}
