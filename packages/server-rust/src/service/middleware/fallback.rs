//! Fallback middleware: turns pipeline errors into call results.
//!
//! A timeout becomes a `Timeout` result; cancellation of the batch is passed
//! through so each kind can report it; every other error (open circuit,
//! transport failure, internal error) becomes an `Error` result.

use std::task::{Context, Poll};

use broker_core::ServiceCallResult;
use tower::{Layer, Service};
use tracing::debug;

use crate::service::policy::{PolicyError, PolicyFuture, PolicyRequest};

// ---------------------------------------------------------------------------
// FallbackLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackLayer;

impl<S> Layer<S> for FallbackLayer {
    type Service = FallbackService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FallbackService { inner }
    }
}

// ---------------------------------------------------------------------------
// FallbackService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FallbackService<S> {
    inner: S,
}

impl<S> Service<PolicyRequest> for FallbackService<S>
where
    S: Service<PolicyRequest, Response = ServiceCallResult, Error = PolicyError> + Send,
    S::Future: Send + 'static,
{
    type Response = ServiceCallResult;
    type Error = PolicyError;
    type Future = PolicyFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PolicyRequest) -> Self::Future {
        let service_id = req.service_id;
        let fut = self.inner.call(req);
        Box::pin(async move {
            match fut.await {
                Ok(result) => Ok(result),
                Err(PolicyError::Timeout { timeout_ms }) => {
                    debug!(%service_id, timeout_ms, "service call timed out");
                    Ok(ServiceCallResult::timeout(service_id))
                }
                Err(PolicyError::Cancelled) => Err(PolicyError::Cancelled),
                Err(e) => {
                    debug!(%service_id, error = %e, "service call failed");
                    Ok(ServiceCallResult::error(service_id))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
