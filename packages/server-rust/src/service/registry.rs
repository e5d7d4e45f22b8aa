use std::sync::Arc;

use broker_core::{CalledService, ServiceDefinition, ServiceId};
use dashmap::DashMap;

use super::middleware::ServicePolicy;

// ---------------------------------------------------------------------------
// PolicyRegistry
// ---------------------------------------------------------------------------

/// Registry of resilience policies, one per service definition.
///
/// Policies are created on first use and live as long as the registry, so
/// breaker state carries across batches. The registry is owned by the
/// composition root and shared with the kind services.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: DashMap<ServiceId, Arc<ServicePolicy>>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the policy for `definition`, creating it from `called` on first use.
    ///
    /// Later changes to the definition's timeout or breaker settings are not
    /// picked up once a policy exists.
    pub fn get_or_create(
        &self,
        definition: &ServiceDefinition,
        called: &CalledService,
    ) -> Arc<ServicePolicy> {
        self.policies
            .entry(definition.id)
            .or_insert_with(|| Arc::new(ServicePolicy::new(definition, called)))
            .value()
            .clone()
    }

    /// Retrieve an existing policy.
    pub fn get(&self, service_id: &ServiceId) -> Option<Arc<ServicePolicy>> {
        self.policies.get(service_id).map(|entry| entry.value().clone())
    }

    /// Drops the policy (and its breaker state) of a service.
    pub fn remove(&self, service_id: &ServiceId) -> bool {
        self.policies.remove(service_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
