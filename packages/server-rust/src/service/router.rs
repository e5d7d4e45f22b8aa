//! Kind routing: dispatches a service definition to the service that
//! implements its kind.

use std::collections::HashMap;
use std::sync::Arc;

use broker_core::{ServiceDefinition, ServiceKindTag};

use super::domain::BrokeredService;

// ---------------------------------------------------------------------------
// KindRouter
// ---------------------------------------------------------------------------

/// Maps each [`ServiceKindTag`] to the [`BrokeredService`] handling it.
///
/// Definitions whose kind has no registered service are skipped by the
/// broker; they produce no result.
#[derive(Default, Clone)]
pub struct KindRouter {
    services: HashMap<ServiceKindTag, Arc<dyn BrokeredService>>,
}

impl KindRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the service for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: ServiceKindTag, service: Arc<dyn BrokeredService>) {
        self.services.insert(kind, service);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: ServiceKindTag, service: Arc<dyn BrokeredService>) -> Self {
        self.register(kind, service);
        self
    }

    /// The service responsible for `definition`, if its kind is registered.
    #[must_use]
    pub fn route(&self, definition: &ServiceDefinition) -> Option<Arc<dyn BrokeredService>> {
        self.services.get(&definition.kind_tag()).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
