//! Metrics middleware for downstream calls.
//!
//! Wraps each call in a `tracing` span carrying the service id and kind,
//! records the outcome on the span, and counts calls per kind and status in
//! `broker_service_calls_total`.

use std::task::{Context, Poll};
use std::time::Instant;

use broker_core::ServiceCallResult;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::policy::{PolicyError, PolicyFuture, PolicyRequest};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and counting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<PolicyRequest> for MetricsService<S>
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
        let kind = req.kind.as_str();
        let span = info_span!(
            "service_call",
            service_id = %req.service_id,
            kind,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(response) => response.status.as_str(),
                    Err(PolicyError::Cancelled) => "cancelled",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "broker_service_calls_total",
                    "kind" => kind,
                    "status" => outcome
                )
                .increment(1);

                tracing::debug!(duration_ms, outcome, "service call complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
