//! In-memory [`ServiceRepository`] implementation.
//!
//! Definitions are kept in registration order, which is also the order in
//! which resolved services are dispatched by the broker.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use broker_core::{ServiceDefinition, ServiceId, ServiceKindTag};
use parking_lot::RwLock;

use crate::traits::ServiceRepository;

/// Registration-ordered definitions behind a read-mostly lock.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    services: RwLock<Vec<ServiceDefinition>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository from a list of definitions.
    #[must_use]
    pub fn with_services(services: Vec<ServiceDefinition>) -> Self {
        Self {
            services: RwLock::new(services),
        }
    }

    /// Parses a JSON array of definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid definition list.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let services: Vec<ServiceDefinition> = serde_json::from_str(json)?;
        Ok(Self::with_services(services))
    }

    /// Reads and parses a JSON definition file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Adds or replaces a definition. A replacement keeps its position.
    pub fn insert(&self, definition: ServiceDefinition) {
        let mut services = self.services.write();
        match services.iter_mut().find(|s| s.id == definition.id) {
            Some(existing) => *existing = definition,
            None => services.push(definition),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    fn of_kind(&self, tag: ServiceKindTag) -> Vec<ServiceDefinition> {
        self.services
            .read()
            .iter()
            .filter(|s| s.kind_tag() == tag)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ServiceRepository for InMemoryRepository {
    async fn services_and_tokens(&self, ids: &[ServiceId]) -> anyhow::Result<Vec<ServiceDefinition>> {
        let wanted: HashSet<&ServiceId> = ids.iter().collect();
        Ok(self
            .services
            .read()
            .iter()
            .filter(|s| wanted.contains(&s.id) || s.tokens.iter().any(|t| wanted.contains(&t.id)))
            .cloned()
            .collect())
    }

    async fn cached_services(&self) -> anyhow::Result<Vec<ServiceDefinition>> {
        Ok(self.of_kind(ServiceKindTag::Cached))
    }

    async fn static_services(&self) -> anyhow::Result<Vec<ServiceDefinition>> {
        Ok(self.of_kind(ServiceKindTag::Static))
    }
}
