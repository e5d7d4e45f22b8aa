//! Pipeline composition: the per-service resilience stack.

use std::sync::Arc;
use std::time::Duration;

use broker_core::{CalledService, ServiceCallResult, ServiceDefinition, ServiceId};
use tower::{Service, ServiceBuilder, ServiceExt};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerLayer};
use super::fallback::FallbackLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::policy::{Invoke, PolicyError, PolicyFuture, PolicyRequest};

/// Build the resilience pipeline around [`Invoke`].
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and the final outcome
/// 2. `FallbackLayer` -- turn timeouts and failures into results
/// 3. `CircuitBreakerLayer` -- fail fast while the service is known bad
/// 4. `TimeoutLayer` -- bound the downstream call
///
/// A timeout raised inside the breaker counts toward its threshold, and an
/// open circuit resolves to an `Error` result through the fallback.
#[must_use]
pub fn build_policy_pipeline(
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
) -> impl Service<PolicyRequest, Response = ServiceCallResult, Error = PolicyError, Future = PolicyFuture>
       + Send {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(FallbackLayer)
        .layer(CircuitBreakerLayer::new(breaker))
        .layer(TimeoutLayer::new(timeout))
        .service(Invoke)
}

/// Resilience policy of one service: its timeout and shared breaker.
#[derive(Debug)]
pub struct ServicePolicy {
    service_id: ServiceId,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl ServicePolicy {
    #[must_use]
    pub fn new(definition: &ServiceDefinition, called: &CalledService) -> Self {
        Self {
            service_id: definition.id,
            timeout: called.timeout,
            breaker: Arc::new(CircuitBreaker::new(
                definition.name.clone(),
                called.circuit_breaker.clone(),
            )),
        }
    }

    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs `request` through the pipeline.
    ///
    /// # Errors
    ///
    /// Only [`PolicyError::Cancelled`] escapes the fallback.
    pub async fn execute(&self, request: PolicyRequest) -> Result<ServiceCallResult, PolicyError> {
        build_policy_pipeline(Arc::clone(&self.breaker), self.timeout)
            .oneshot(request)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
