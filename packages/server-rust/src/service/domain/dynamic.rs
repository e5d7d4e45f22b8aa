//! Dynamic services: called on every request, never served from the cache.

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::{PostParameter, ServiceCallResult, ServiceDefinition, ServiceKind};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{require_region, BrokeredService, CallError};
use crate::service::called::CalledServiceCore;
use crate::service::policy::PolicyError;

pub struct DynamicService {
    core: Arc<CalledServiceCore>,
}

impl DynamicService {
    #[must_use]
    pub fn new(core: Arc<CalledServiceCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl BrokeredService for DynamicService {
    async fn call_service(
        &self,
        definition: Arc<ServiceDefinition>,
        region: String,
        cancel: CancellationToken,
        additional_parameters: Arc<[PostParameter]>,
    ) -> Result<Option<ServiceCallResult>, CallError> {
        let ServiceKind::Dynamic(called) = &definition.kind else {
            return Ok(None);
        };
        let Some(endpoint) = called.callable_endpoint() else {
            return Ok(None);
        };
        require_region(&region)?;

        let params = self
            .core
            .post_parameters(called, &region, &additional_parameters);
        let tokens = Arc::clone(self.core.tokens());
        let service_id = definition.id;
        let token_definitions = definition.tokens.clone();
        let request = self.core.request(&definition, endpoint, params, cancel, move |response| {
            if !response.is_success() {
                return Ok(ServiceCallResult::error(service_id));
            }
            let parsed = tokens
                .parse_tokens(&region, &response.body, &token_definitions)
                .map_err(|e| PolicyError::Internal(anyhow::Error::new(e)))?;
            Ok(ServiceCallResult::success(service_id, Some(response.body), parsed))
        });

        let policy = self.core.policy(&definition, called);
        match policy.execute(request).await {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                warn!(service_id = %definition.id, error = %e, "dynamic service call failed");
                Ok(Some(ServiceCallResult::error(definition.id)))
            }
        }
    }
}
