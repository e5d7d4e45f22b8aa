//! Request and error types flowing through the per-service resilience
//! pipeline, plus the innermost [`Invoke`] service that runs the call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use broker_core::{ServiceCallResult, ServiceId, ServiceKindTag};
use tower::Service;

use crate::transport::TransportError;

/// Boxed future produced by every layer of the pipeline.
pub type PolicyFuture = Pin<Box<dyn Future<Output = Result<ServiceCallResult, PolicyError>> + Send>>;

/// One downstream call submitted to a service's resilience pipeline.
pub struct PolicyRequest {
    pub service_id: ServiceId,
    pub kind: ServiceKindTag,
    call: PolicyFuture,
}

impl PolicyRequest {
    pub fn new<F>(service_id: ServiceId, kind: ServiceKindTag, call: F) -> Self
    where
        F: Future<Output = Result<ServiceCallResult, PolicyError>> + Send + 'static,
    {
        Self {
            service_id,
            kind,
            call: Box::pin(call),
        }
    }
}

impl std::fmt::Debug for PolicyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRequest")
            .field("service_id", &self.service_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Errors raised inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("circuit is open")]
    BrokenCircuit,
    #[error("call cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PolicyError {
    /// Transport cancellation is the batch's cancellation, not a failure.
    #[must_use]
    pub fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Invoke
// ---------------------------------------------------------------------------

/// Innermost service: awaits the request's call future.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invoke;

impl Service<PolicyRequest> for Invoke {
    type Response = ServiceCallResult;
    type Error = PolicyError;
    type Future = PolicyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PolicyRequest) -> Self::Future {
        req.call
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn invoke_runs_the_call() {
        let id = Uuid::new_v4();
        let req = PolicyRequest::new(id, ServiceKindTag::Dynamic, async move {
            Ok(ServiceCallResult::error(id))
        });
        let result = Invoke.oneshot(req).await.unwrap();
        assert_eq!(result.service_id, id);
    }

    #[test]
    fn transport_cancellation_maps_to_cancelled() {
        assert!(matches!(
            PolicyError::from_transport(TransportError::Cancelled),
            PolicyError::Cancelled
        ));
        assert!(matches!(
            PolicyError::from_transport(TransportError::Other("x".to_string())),
            PolicyError::Transport(_)
        ));
    }
}
