use async_trait::async_trait;
use broker_core::{PostParameter, ServiceDefinition, ServiceId};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::transport::{HttpResponse, TransportError};

/// Source of service definitions.
/// Implementations: in-memory (tests, CLI), database-backed (deployments).
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Resolve service or token identifiers to the services that own them.
    ///
    /// Results follow the repository's own order and contain each service once.
    async fn services_and_tokens(&self, ids: &[ServiceId]) -> anyhow::Result<Vec<ServiceDefinition>>;

    /// All definitions of the cached kind.
    async fn cached_services(&self) -> anyhow::Result<Vec<ServiceDefinition>>;

    /// All definitions of the static kind.
    async fn static_services(&self) -> anyhow::Result<Vec<ServiceDefinition>>;
}

/// Outbound HTTP used by called services.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `params` as a form body to `endpoint`.
    ///
    /// Implementations should return promptly once `cancel` fires.
    async fn post(
        &self,
        endpoint: &str,
        params: &[PostParameter],
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// Runs fire-and-forget work outside the caller's task.
pub trait TaskScheduler: Send + Sync {
    /// Queue `work`. Failures to queue are logged, not returned.
    fn queue_background_work_item(&self, work: BoxFuture<'static, ()>);
}
