//! Shared helper for the kinds that call a downstream endpoint.
//!
//! [`CalledServiceCore`] assembles post parameters, hands out the service's
//! resilience policy, and builds the [`PolicyRequest`] that performs the HTTP
//! exchange. Dynamic and Cached services each hold an `Arc` of it.

use std::sync::Arc;

use broker_core::{
    Cache, CalledService, PostParameter, ServiceCallResult, ServiceDefinition, TokenEngine,
};
use tokio_util::sync::CancellationToken;

use crate::service::config::BrokerConfig;
use crate::service::middleware::ServicePolicy;
use crate::service::policy::{PolicyError, PolicyRequest};
use crate::service::registry::PolicyRegistry;
use crate::traits::HttpTransport;
use crate::transport::HttpResponse;

/// Collaborators shared by called kinds.
pub struct CalledServiceCore {
    cache: Arc<dyn Cache>,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenEngine>,
    policies: Arc<PolicyRegistry>,
    config: Arc<BrokerConfig>,
}

impl CalledServiceCore {
    #[must_use]
    pub fn new(
        cache: Arc<dyn Cache>,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenEngine>,
        policies: Arc<PolicyRegistry>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            cache,
            transport,
            tokens,
            policies,
            config,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenEngine> {
        &self.tokens
    }

    /// Final post body for a call.
    ///
    /// Order: caller parameters, then the user identifier if the region holds
    /// one, then every declared additional parameter with a non-empty cached
    /// value. Parameters without a value are left out.
    #[must_use]
    pub fn post_parameters(
        &self,
        called: &CalledService,
        region: &str,
        additional: &[PostParameter],
    ) -> Vec<PostParameter> {
        let mut params = additional.to_vec();

        if let Some(Some(identifier)) = self
            .cache
            .get_text(region, &self.config.user_identifier_cache_key)
        {
            params.push((self.config.user_identifier_post_key.clone(), identifier));
        }

        params.extend(
            called
                .additional_parameters
                .iter()
                .filter_map(|parameter| {
                    match self.cache.get_text(region, &parameter.token_id.to_string()) {
                        Some(Some(value)) if !value.is_empty() => {
                            Some((parameter.name.clone(), value))
                        }
                        _ => None,
                    }
                }),
        );
        params
    }

    /// Policy for `definition`, created on first use.
    #[must_use]
    pub fn policy(&self, definition: &ServiceDefinition, called: &CalledService) -> Arc<ServicePolicy> {
        self.policies.get_or_create(definition, called)
    }

    /// Builds the request that posts to `endpoint` and maps the response
    /// with `on_response`.
    pub fn request<F>(
        &self,
        definition: &ServiceDefinition,
        endpoint: &str,
        params: Vec<PostParameter>,
        cancel: CancellationToken,
        on_response: F,
    ) -> PolicyRequest
    where
        F: FnOnce(HttpResponse) -> Result<ServiceCallResult, PolicyError> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let endpoint = endpoint.to_string();
        PolicyRequest::new(definition.id, definition.kind_tag(), async move {
            let response = transport
                .post(&endpoint, &params, cancel)
                .await
                .map_err(PolicyError::from_transport)?;
            on_response(response)
        })
    }
}
