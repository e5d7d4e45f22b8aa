//! Timeout middleware for downstream calls.
//!
//! Rejects calls that exceed the service's configured timeout with
//! `PolicyError::Timeout`.

use std::task::{Context, Poll};
use std::time::Duration;

use broker_core::ServiceCallResult;
use tower::{Layer, Service};

use crate::service::policy::{PolicyError, PolicyFuture, PolicyRequest};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds each call to a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the call timeout.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<PolicyRequest> for TimeoutService<S>
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
        let duration = self.timeout;
        let fut = self.inner.call(req);
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(PolicyError::Timeout {
                    timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use broker_core::ServiceKindTag;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::service::policy::Invoke;

    fn slow_request(delay_ms: u64) -> PolicyRequest {
        let id = Uuid::new_v4();
        PolicyRequest::new(id, ServiceKindTag::Dynamic, async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(ServiceCallResult::success(id, Some("ok".to_string()), Vec::new()))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Duration::from_millis(1000)).layer(Invoke);
        let result = svc.oneshot(slow_request(10)).await.unwrap();
        assert_eq!(result.value.as_deref(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(Invoke);
        let err = svc.oneshot(slow_request(200)).await.unwrap_err();
        assert!(matches!(err, PolicyError::Timeout { timeout_ms: 50 }));
    }
}
