//! Tower middleware layers for the per-service resilience pipeline.
//!
//! - [`metrics`]: Call timing, outcome spans, and call counters
//! - [`fallback`]: Maps timeouts and failures to call results
//! - [`circuit_breaker`]: Consecutive-failure circuit breaker
//! - [`timeout`]: Per-service call timeout
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod circuit_breaker;
pub mod fallback;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerLayer, CircuitState};
pub use fallback::FallbackLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_policy_pipeline, ServicePolicy};
pub use timeout::TimeoutLayer;
