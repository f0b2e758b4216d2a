//! Per-call fault-tolerance primitives for adapter call sites.
//!
//! Composition order in the live v2 adapter, outermost first:
//! circuit breaker → retry with backoff → rate limiter → HTTP call.
//! The breaker wraps the retried call so that an exhausted retry run
//! counts as a single breaker failure.

mod circuit_breaker;
mod precision;
mod rate_limit;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerSnapshot,
    CircuitState,
};
pub use precision::{PrecisionMapper, SymbolPrecision};
pub use rate_limit::RateLimiter;
pub use retry::{RetryPolicy, with_retry, with_retry_if};
