//! Service kinds.
//!
//! Each kind implements [`BrokeredService`]. Dynamic and Cached services
//! share a [`CalledServiceCore`](crate::service::called::CalledServiceCore);
//! the static kind only needs the token engine.

pub mod cached;
pub mod dynamic;
pub mod static_data;

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::{PostParameter, ServiceCallResult, ServiceDefinition, TokenError};
use tokio_util::sync::CancellationToken;

pub use cached::CachedService;
pub use dynamic::DynamicService;
pub use static_data::StaticService;

/// Errors a kind service returns instead of a result.
///
/// Downstream failures never show up here; they become results with status
/// `Error` or `Timeout`.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Common calling interface of the service kinds.
#[async_trait]
pub trait BrokeredService: Send + Sync {
    /// Calls `definition` on behalf of `region`.
    ///
    /// `Ok(None)` means the definition is not something this kind can call:
    /// wrong kind, no endpoint, or no data.
    async fn call_service(
        &self,
        definition: Arc<ServiceDefinition>,
        region: String,
        cancel: CancellationToken,
        additional_parameters: Arc<[PostParameter]>,
    ) -> Result<Option<ServiceCallResult>, CallError>;
}

fn require_region(region: &str) -> Result<(), CallError> {
    if region.is_empty() {
        return Err(TokenError::MissingArgument("region").into());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Stub collaborators shared by the kind tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use broker_core::{
        CalledService, CircuitBreakerSettings, MemoryCache, ServiceKind, TokenDefinition,
        TokenEngine, TokenStrategy,
    };
    use http::StatusCode;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::service::called::CalledServiceCore;
    use crate::service::config::BrokerConfig;
    use crate::service::registry::PolicyRegistry;
    use crate::traits::HttpTransport;
    use crate::transport::{HttpResponse, TransportError};

    /// Transport replaying scripted responses, counting every call.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub calls: AtomicU32,
        pub delay: Option<Duration>,
        pub responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        pub seen: Mutex<Vec<Vec<PostParameter>>>,
    }

    impl ScriptedTransport {
        pub fn replying(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post(
            &self,
            _endpoint: &str,
            params: &[PostParameter],
            cancel: CancellationToken,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(params.to_vec());
            if let Some(delay) = self.delay {
                tokio::select! {
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(StatusCode::OK, String::new())))
        }
    }

    pub fn ok(body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(StatusCode::OK, body.to_string()))
    }

    pub fn status(code: StatusCode) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(code, String::new()))
    }

    pub fn core(cache: Arc<MemoryCache>, transport: Arc<ScriptedTransport>) -> Arc<CalledServiceCore> {
        Arc::new(CalledServiceCore::new(
            cache.clone(),
            transport,
            Arc::new(TokenEngine::new(cache)),
            Arc::new(PolicyRegistry::new()),
            Arc::new(BrokerConfig::default()),
        ))
    }

    pub fn name_token() -> TokenDefinition {
        TokenDefinition {
            id: Uuid::new_v4(),
            name: "name".to_string(),
            strategy: TokenStrategy::XPath(Some("/person/name".to_string())),
        }
    }

    pub fn called(timeout: Duration) -> CalledService {
        CalledService {
            endpoint: Some("http://downstream/profile".to_string()),
            timeout,
            circuit_breaker: CircuitBreakerSettings::default(),
            additional_parameters: Vec::new(),
        }
    }

    pub fn definition(kind: ServiceKind, tokens: Vec<TokenDefinition>) -> Arc<ServiceDefinition> {
        Arc::new(ServiceDefinition {
            id: Uuid::new_v4(),
            name: "person".to_string(),
            tokens,
            exclude_from_visible_profile: false,
            kind,
        })
    }

    pub fn no_params() -> Arc<[PostParameter]> {
        Arc::from(Vec::new())
    }
}
