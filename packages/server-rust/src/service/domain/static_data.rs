//! Static services: a precomputed payload, typically stored at sign-in.

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::{PostParameter, ServiceCallResult, ServiceDefinition, ServiceKind, TokenEngine};
use tokio_util::sync::CancellationToken;

use super::{require_region, BrokeredService, CallError};

/// Extracts tokens from the definition's literal data and caches them.
pub struct StaticService {
    tokens: Arc<TokenEngine>,
}

impl StaticService {
    #[must_use]
    pub fn new(tokens: Arc<TokenEngine>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl BrokeredService for StaticService {
    async fn call_service(
        &self,
        definition: Arc<ServiceDefinition>,
        region: String,
        _cancel: CancellationToken,
        _additional_parameters: Arc<[PostParameter]>,
    ) -> Result<Option<ServiceCallResult>, CallError> {
        let ServiceKind::Static { data: Some(data) } = &definition.kind else {
            return Ok(None);
        };
        if data.is_empty() {
            return Ok(None);
        }
        require_region(&region)?;

        let parsed = self.tokens.parse_tokens(&region, data, &definition.tokens)?;
        self.tokens.cache_tokens(&region, &parsed);
        Ok(Some(ServiceCallResult::success(
            definition.id,
            Some(data.clone()),
            parsed,
        )))
    }
}
