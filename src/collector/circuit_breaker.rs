use crate::github::ErrorClass;

/// Which repository failures are treated as systemic.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// A single failure of one of these classes trips the breaker.
    pub trip_on: Vec<ErrorClass>,
    /// Failures of these classes trip the breaker once
    /// `sustained_threshold` repositories in a row have hit them.
    pub sustained_on: Vec<ErrorClass>,
    pub sustained_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_on: vec![ErrorClass::Authorization],
            sustained_on: vec![ErrorClass::Connectivity, ErrorClass::Timeout],
            sustained_threshold: 3,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive: u32,
    tripped: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive: 0,
            tripped: false,
        }
    }

    /// Records a failed repository. Returns `true` once the breaker is open.
    pub fn record_failure(&mut self, class: ErrorClass) -> bool {
        if self.config.trip_on.contains(&class) {
            tracing::error!("Circuit breaker tripped by {} failure", class);
            self.tripped = true;
        } else if self.config.sustained_on.contains(&class) {
            self.consecutive += 1;
            tracing::warn!(
                "{} consecutive {} failure(s) (limit {})",
                self.consecutive,
                class,
                self.config.sustained_threshold
            );
            if self.config.sustained_threshold > 0
                && self.consecutive >= self.config.sustained_threshold
            {
                tracing::error!("Circuit breaker tripped by sustained {} failures", class);
                self.tripped = true;
            }
        } else {
            self.consecutive = 0;
        }
        self.tripped
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn is_open(&self) -> bool {
        self.tripped
    }
}
