pub mod circuit_breaker;
pub mod orchestrator;
pub mod progress;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use orchestrator::{Collector, CollectorConfig, RunState};
pub use progress::{Progress, ProgressKind};
