//! Resilience layer for model calls.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod reliability;
pub mod request_queue;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitPermit, CircuitState};
pub use rate_limiter::RateLimiter;
pub use reliability::{Generation, ModelHealth, ModelReliability, ReliabilitySession};
pub use request_queue::{QueueStats, RequestQueue};
pub use retry::{RetryPolicy, RetryPredicate};
