//! Circuit breaker middleware.
//!
//! Counts consecutive handled events (timeouts, and results whose status is
//! `Error`). After `exception_count` of them the circuit opens and calls fail
//! fast with `PolicyError::BrokenCircuit` for `break_duration`. The first call
//! after that is a probe: success closes the circuit, a handled event opens
//! it again. Other errors pass through without touching the count.

use std::sync::Arc;
use std::task::{Context, Poll};

use broker_core::{CircuitBreakerSettings, ServiceCallResult, ServiceStatus};
use parking_lot::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::policy::{PolicyError, PolicyFuture, PolicyRequest};

/// Observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Shared breaker state for one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    settings: CircuitBreakerSettings,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(service_name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            service_name: service_name.into(),
            settings,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state. An open circuit whose break has elapsed reports `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let state = self.state.lock();
        match state.circuit {
            CircuitState::Open if self.break_elapsed(&state) => CircuitState::HalfOpen,
            other => other,
        }
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    fn threshold(&self) -> u32 {
        self.settings.exception_count.max(1)
    }

    fn break_elapsed(&self, state: &BreakerState) -> bool {
        state
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.settings.break_duration)
    }

    /// Admits a call, or rejects it while the circuit is open.
    fn admit(self: &Arc<Self>) -> Option<Admission> {
        let mut state = self.state.lock();
        let probe = match state.circuit {
            CircuitState::Closed => false,
            CircuitState::Open if self.break_elapsed(&state) => {
                state.circuit = CircuitState::HalfOpen;
                state.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => return None,
        };
        Some(Admission {
            breaker: Arc::clone(self),
            probe,
            settled: false,
        })
    }

    fn record_success(&self, probe: bool) {
        let mut state = self.state.lock();
        if probe {
            state.probe_in_flight = false;
        }
        let was_broken = state.circuit != CircuitState::Closed;
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        if was_broken {
            warn!(
                service = %self.service_name,
                "service is back up, circuit closed again"
            );
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut state = self.state.lock();
        if probe {
            state.probe_in_flight = false;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let reopen = state.circuit == CircuitState::HalfOpen;
        if reopen || state.consecutive_failures >= self.threshold() {
            if state.circuit != CircuitState::Open {
                warn!(
                    service = %self.service_name,
                    consecutive_failures = state.consecutive_failures,
                    "service reached its circuit breaker threshold, circuit opened"
                );
                metrics::counter!("broker_circuit_opened_total").increment(1);
            }
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    fn release_probe(&self) {
        self.state.lock().probe_in_flight = false;
    }
}

/// Ticket for one admitted call. Dropping it unsettled frees a probe slot.
struct Admission {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl Admission {
    fn settle(mut self, result: &Result<ServiceCallResult, PolicyError>) {
        self.settled = true;
        match result {
            Ok(response) if response.status == ServiceStatus::Error => {
                self.breaker.record_failure(self.probe);
            }
            Ok(_) => self.breaker.record_success(self.probe),
            Err(PolicyError::Timeout { .. }) => self.breaker.record_failure(self.probe),
            Err(_) => {
                if self.probe {
                    self.breaker.release_probe();
                }
            }
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerLayer
// ---------------------------------------------------------------------------

/// Tower layer sharing one [`CircuitBreaker`] across all calls of a service.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S> Service<PolicyRequest> for CircuitBreakerService<S>
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
        let Some(admission) = self.breaker.admit() else {
            return Box::pin(async { Err(PolicyError::BrokenCircuit) });
        };

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            admission.settle(&result);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use broker_core::ServiceKindTag;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::service::middleware::TimeoutLayer;
    use crate::service::policy::Invoke;

    fn breaker(exception_count: u32, break_ms: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerSettings {
                exception_count,
                break_duration: Duration::from_millis(break_ms),
            },
        ))
    }

    fn request(status: ServiceStatus, calls: &Arc<AtomicU32>) -> PolicyRequest {
        let id = Uuid::new_v4();
        let calls = Arc::clone(calls);
        PolicyRequest::new(id, ServiceKindTag::Cached, async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ServiceCallResult::with_status(id, status))
        })
    }

    async fn send(
        breaker: &Arc<CircuitBreaker>,
        req: PolicyRequest,
    ) -> Result<ServiceCallResult, PolicyError> {
        CircuitBreakerLayer::new(Arc::clone(breaker))
            .layer(Invoke)
            .oneshot(req)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_consecutive_error_results() {
        let breaker = breaker(2, 30_000);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let result = send(&breaker, request(ServiceStatus::Error, &calls)).await;
            assert_eq!(result.unwrap().status, ServiceStatus::Error);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = send(&breaker, request(ServiceStatus::Success, &calls))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::BrokenCircuit));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_count() {
        let breaker = breaker(2, 30_000);
        let calls = Arc::new(AtomicU32::new(0));

        send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();
        send(&breaker, request(ServiceStatus::Success, &calls)).await.unwrap();
        send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_toward_the_threshold() {
        let breaker = breaker(1, 30_000);
        let id = Uuid::new_v4();
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker))
            .layer(TimeoutLayer::new(Duration::from_millis(10)).layer(Invoke));
        let req = PolicyRequest::new(id, ServiceKindTag::Dynamic, async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(ServiceCallResult::success(id, None, Vec::new()))
        });

        let err = svc.oneshot(req).await.unwrap_err();
        assert!(matches!(err, PolicyError::Timeout { .. }));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes_circuit() {
        let breaker = breaker(1, 100);
        let calls = Arc::new(AtomicU32::new(0));

        send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = send(&breaker, request(ServiceStatus::Success, &calls))
            .await
            .unwrap();
        assert_eq!(result.status, ServiceStatus::Success);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens_circuit() {
        let breaker = breaker(3, 100);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            send(&breaker, request(ServiceStatus::Success, &calls)).await,
            Err(PolicyError::BrokenCircuit)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unhandled_errors_do_not_count() {
        let breaker = breaker(1, 100);
        let id = Uuid::new_v4();
        let req = PolicyRequest::new(id, ServiceKindTag::Dynamic, async {
            Err::<ServiceCallResult, _>(PolicyError::Internal(anyhow::anyhow!("boom")))
        });

        assert!(send(&breaker, req).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_the_slot() {
        let breaker = breaker(1, 100);
        let calls = Arc::new(AtomicU32::new(0));
        send(&breaker, request(ServiceStatus::Error, &calls)).await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let id = Uuid::new_v4();
        let pending = CircuitBreakerLayer::new(Arc::clone(&breaker))
            .layer(Invoke)
            .oneshot(PolicyRequest::new(id, ServiceKindTag::Cached, async {
                std::future::pending::<Result<ServiceCallResult, PolicyError>>().await
            }));
        let abandoned = tokio::time::timeout(Duration::from_millis(5), pending).await;
        assert!(abandoned.is_err());

        let result = send(&breaker, request(ServiceStatus::Success, &calls)).await;
        assert_eq!(result.unwrap().status, ServiceStatus::Success);
    }
}
