//! Service call pipeline.
//!
//! 1. **Broker** (`broker`): resolves ids and fans calls out under a deadline
//! 2. **Routing** (`router`): picks the service for a definition's kind
//! 3. **Kinds** (`domain`): Dynamic, Cached and Static services
//! 4. **Resilience** (`middleware`, `policy`, `registry`): per-service tower
//!    stack of timeout, circuit breaker, fallback, and metrics
//! 5. **Background workers** (`worker`): fire-and-forget batches
//! 6. **Profile** (`profile`): renders a region's cached data as XML

pub mod broker;
pub mod called;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod policy;
pub mod profile;
pub mod registry;
pub mod router;
pub mod worker;

use std::sync::Arc;

use broker_core::{Cache, ServiceKindTag, TokenEngine};

// Re-export key types for convenient access.
pub use broker::{BrokerError, ServiceBroker};
pub use called::CalledServiceCore;
pub use config::BrokerConfig;
pub use domain::{BrokeredService, CachedService, CallError, DynamicService, StaticService};
pub use policy::{PolicyError, PolicyRequest};
pub use registry::PolicyRegistry;
pub use router::KindRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkItemRunner, WorkQueue};

use crate::traits::{HttpTransport, ServiceRepository, TaskScheduler};

/// The kind services of a broker, sharing one cache, transport, token
/// engine, and policy registry.
pub struct KindServices {
    pub dynamic: Arc<DynamicService>,
    pub cached: Arc<CachedService>,
    pub static_data: Arc<StaticService>,
}

impl KindServices {
    #[must_use]
    pub fn new(
        cache: Arc<dyn Cache>,
        transport: Arc<dyn HttpTransport>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        let tokens = Arc::new(TokenEngine::new(Arc::clone(&cache)));
        let core = Arc::new(CalledServiceCore::new(
            cache,
            transport,
            Arc::clone(&tokens),
            Arc::new(PolicyRegistry::new()),
            config,
        ));
        Self {
            dynamic: Arc::new(DynamicService::new(Arc::clone(&core))),
            cached: Arc::new(CachedService::new(core)),
            static_data: Arc::new(StaticService::new(tokens)),
        }
    }

    /// A router with every kind registered.
    #[must_use]
    pub fn router(&self) -> KindRouter {
        KindRouter::new()
            .with(ServiceKindTag::Dynamic, self.dynamic.clone())
            .with(ServiceKindTag::Cached, self.cached.clone())
            .with(ServiceKindTag::Static, self.static_data.clone())
    }
}

/// Wires a broker over `repository` with all three kinds registered.
///
/// The kind services are returned alongside so callers can administer the
/// cached kind's single-flight permits.
#[must_use]
pub fn build_broker(
    repository: Arc<dyn ServiceRepository>,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn HttpTransport>,
    scheduler: Arc<dyn TaskScheduler>,
    config: Arc<BrokerConfig>,
) -> (ServiceBroker, KindServices) {
    let services = KindServices::new(Arc::clone(&cache), transport, config);
    let broker = ServiceBroker::new(repository, services.router(), cache, scheduler);
    (broker, services)
}
