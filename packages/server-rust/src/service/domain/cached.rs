//! Cached services: one downstream attempt per region, then served from the
//! cache.
//!
//! Calls are single-flight per `(region, cache key)`. The first caller holds
//! the permit while it fetches; everyone queued behind it finds the cached
//! body once the permit is released. A failed fetch caches an empty body, so
//! the region keeps answering from the cache until it is cleared.

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::{
    Cache, PostParameter, ServiceCallResult, ServiceDefinition, ServiceKind, TokenEngine,
};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{require_region, BrokeredService, CallError};
use crate::service::called::CalledServiceCore;
use crate::service::policy::PolicyError;

pub struct CachedService {
    core: Arc<CalledServiceCore>,
    semaphores: DashMap<(String, String), Arc<Semaphore>>,
}

impl CachedService {
    #[must_use]
    pub fn new(core: Arc<CalledServiceCore>) -> Self {
        Self {
            core,
            semaphores: DashMap::new(),
        }
    }

    /// Drops every single-flight permit of `region`.
    ///
    /// Returns `true` when every matching permit was removed. Permits held by
    /// in-flight calls stay alive until those calls finish.
    pub fn remove_semaphores(&self, region: &str) -> bool {
        let keys: Vec<(String, String)> = self
            .semaphores
            .iter()
            .filter(|entry| entry.key().0 == region)
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter()
            .map(|key| self.semaphores.remove(key).is_some())
            .fold(true, |all, removed| all && removed)
    }

    #[must_use]
    pub fn semaphore_count(&self) -> usize {
        self.semaphores.len()
    }

    fn semaphore(&self, region: &str, cache_key: String) -> Arc<Semaphore> {
        self.semaphores
            .entry((region.to_string(), cache_key))
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .value()
            .clone()
    }

    fn from_cache(
        &self,
        definition: &ServiceDefinition,
        region: &str,
        body: Option<String>,
    ) -> Result<ServiceCallResult, CallError> {
        debug!(service_id = %definition.id, region, "cached service hit");
        let tokens = self.core.tokens();
        let parsed = match body.as_deref() {
            Some(text) if !text.is_empty() => {
                let parsed = tokens.parse_tokens(region, text, &definition.tokens)?;
                tokens.cache_tokens(region, &parsed);
                parsed
            }
            _ => Vec::new(),
        };
        Ok(ServiceCallResult::success(definition.id, body, parsed))
    }
}

fn store_response(
    cache: &dyn Cache,
    tokens: &TokenEngine,
    definition: &ServiceDefinition,
    region: &str,
    body: String,
) -> Result<ServiceCallResult, PolicyError> {
    let parsed = tokens
        .parse_tokens(region, &body, &definition.tokens)
        .map_err(|e| PolicyError::Internal(anyhow::Error::new(e)))?;
    tokens.cache_tokens(region, &parsed);
    cache.set_text(region, &definition.cache_key(), Some(body.clone()));
    Ok(ServiceCallResult::success(definition.id, Some(body), parsed))
}

#[async_trait]
impl BrokeredService for CachedService {
    async fn call_service(
        &self,
        definition: Arc<ServiceDefinition>,
        region: String,
        cancel: CancellationToken,
        additional_parameters: Arc<[PostParameter]>,
    ) -> Result<Option<ServiceCallResult>, CallError> {
        let ServiceKind::Cached(called) = &definition.kind else {
            return Ok(None);
        };
        let Some(endpoint) = called.callable_endpoint() else {
            return Ok(None);
        };
        require_region(&region)?;

        let semaphore = self.semaphore(&region, definition.cache_key());
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Some(ServiceCallResult::timeout(definition.id))),
            permit = semaphore.acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            // Only reachable if the semaphore was closed.
            return Ok(Some(ServiceCallResult::timeout(definition.id)));
        };

        if cancel.is_cancelled() {
            return Ok(Some(ServiceCallResult::timeout(definition.id)));
        }

        let cache = Arc::clone(self.core.cache());
        if let Some(body) = cache.get_text(&region, &definition.cache_key()) {
            return self.from_cache(&definition, &region, body).map(Some);
        }

        debug!(service_id = %definition.id, region = %region, "cached service miss");
        let params = self
            .core
            .post_parameters(called, &region, &additional_parameters);
        let tokens = Arc::clone(self.core.tokens());
        let owned = Arc::clone(&definition);
        let request = self.core.request(&definition, endpoint, params, cancel, move |response| {
            if response.is_success() {
                return store_response(cache.as_ref(), &tokens, &owned, &region, response.body);
            }
            warn!(
                service_id = %owned.id,
                status = response.status.as_u16(),
                "cached service returned failure, caching empty body"
            );
            cache.set_text(&region, &owned.cache_key(), None);
            Ok(ServiceCallResult::error(owned.id))
        });

        let policy = self.core.policy(&definition, called);
        match policy.execute(request).await {
            Ok(result) => Ok(Some(result)),
            Err(PolicyError::Cancelled) => Ok(Some(ServiceCallResult::timeout(definition.id))),
            Err(e) => {
                warn!(service_id = %definition.id, error = %e, "cached service call failed");
                Ok(Some(ServiceCallResult::error(definition.id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use broker_core::{CircuitBreakerSettings, MemoryCache, ServiceStatus, TokenStatus};
    use http::StatusCode;

    use super::*;
    use crate::service::domain::test_support::{
        called, core, definition, name_token, no_params, ok, status, ScriptedTransport,
    };

    fn service(transport: &Arc<ScriptedTransport>, cache: &Arc<MemoryCache>) -> Arc<CachedService> {
        Arc::new(CachedService::new(core(Arc::clone(cache), Arc::clone(transport))))
    }

    fn cached_definition() -> Arc<ServiceDefinition> {
        definition(ServiceKind::Cached(called(Duration::from_secs(5))), vec![name_token()])
    }

    async fn call(
        service: &CachedService,
        def: &Arc<ServiceDefinition>,
        region: &str,
    ) -> ServiceCallResult {
        service
            .call_service(Arc::clone(def), region.to_string(), CancellationToken::new(), no_params())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::replying(vec![ok(
            "<person><name>Ada</name></person>",
        )]));
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        let first = call(&service, &def, "r").await;
        let second = call(&service, &def, "r").await;

        assert_eq!(first.status, ServiceStatus::Success);
        assert_eq!(second.status, ServiceStatus::Success);
        assert_eq!(second.value, first.value);
        assert_eq!(second.tokens[0].value.as_deref(), Some("Ada"));
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            cache.get_text("r", &def.tokens[0].cache_key()),
            Some(Some("Ada".to_string()))
        );
    }

    #[tokio::test]
    async fn regions_are_fetched_independently() {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        call(&service, &def, "a").await;
        call(&service, &def, "b").await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(service.semaphore_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_fetch() {
        let transport = Arc::new(
            ScriptedTransport::replying(vec![ok("<person><name>Ada</name></person>")])
                .slow(Duration::from_millis(50)),
        );
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        let (a, b) = tokio::join!(call(&service, &def, "r"), call(&service, &def, "r"));

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.status, ServiceStatus::Success);
        assert_eq!(b.status, ServiceStatus::Success);
        assert_eq!(a.value, b.value);
    }

    #[tokio::test]
    async fn failure_is_cached_as_empty_body() {
        let transport = Arc::new(ScriptedTransport::replying(vec![status(
            StatusCode::INTERNAL_SERVER_ERROR,
        )]));
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        let first = call(&service, &def, "r").await;
        assert_eq!(first.status, ServiceStatus::Error);
        assert_eq!(cache.get_text("r", &def.cache_key()), Some(None));

        let second = call(&service, &def, "r").await;
        assert_eq!(second.status, ServiceStatus::Success);
        assert!(second.value.is_none());
        assert!(second.tokens.is_empty());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_entry_is_timeout() {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service
            .call_service(cached_definition(), "r".into(), cancel, no_params())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, ServiceStatus::Timeout);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_times_out_without_fetching() {
        let transport = Arc::new(
            ScriptedTransport::replying(vec![ok("<person><name>Ada</name></person>")])
                .slow(Duration::from_millis(100)),
        );
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        let holder = {
            let service = Arc::clone(&service);
            let def = Arc::clone(&def);
            tokio::spawn(async move { call(&service, &def, "r").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancel = CancellationToken::new();
        let waiter = {
            let service = Arc::clone(&service);
            let def = Arc::clone(&def);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                service
                    .call_service(def, "r".into(), cancel, no_params())
                    .await
                    .unwrap()
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap().status, ServiceStatus::Timeout);
        assert_eq!(holder.await.unwrap().status, ServiceStatus::Success);
        assert_eq!(call(&service, &def, "r").await.status, ServiceStatus::Success);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancellation_during_fetch_is_timeout_and_caches_nothing() {
        let transport = Arc::new(
            ScriptedTransport::replying(Vec::new()).slow(Duration::from_secs(10)),
        );
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();
        let cancel = CancellationToken::new();

        let running = {
            let service = Arc::clone(&service);
            let def = Arc::clone(&def);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                service
                    .call_service(def, "r".into(), cancel, no_params())
                    .await
                    .unwrap()
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(running.await.unwrap().status, ServiceStatus::Timeout);
        assert!(cache.get_text("r", &def.cache_key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn policy_timeouts_open_the_circuit() {
        let transport = Arc::new(
            ScriptedTransport::replying(Vec::new()).slow(Duration::from_secs(10)),
        );
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let mut settings = called(Duration::from_millis(50));
        settings.circuit_breaker = CircuitBreakerSettings {
            exception_count: 1,
            break_duration: Duration::from_secs(30),
        };
        let def = definition(ServiceKind::Cached(settings), vec![name_token()]);

        let first = call(&service, &def, "r").await;
        assert_eq!(first.status, ServiceStatus::Timeout);
        assert!(cache.get_text("r", &def.cache_key()).is_none());

        let second = call(&service, &def, "r").await;
        assert_eq!(second.status, ServiceStatus::Error);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cached_body_hit_reuses_cached_tokens() {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();
        cache.set_text(
            "r",
            &def.cache_key(),
            Some("<person><name>Ada</name></person>".to_string()),
        );
        cache.set_text("r", &def.tokens[0].cache_key(), Some("Override".to_string()));

        let result = call(&service, &def, "r").await;
        assert_eq!(result.tokens[0].status, TokenStatus::Found);
        assert_eq!(result.tokens[0].value.as_deref(), Some("Override"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn remove_semaphores_only_touches_the_region() {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let service = service(&transport, &cache);
        let def = cached_definition();

        call(&service, &def, "a").await;
        call(&service, &def, "a-b").await;
        assert!(service.remove_semaphores("a"));
        assert_eq!(service.semaphore_count(), 1);
        assert!(service.remove_semaphores("missing"));
    }

    #[tokio::test]
    async fn empty_region_is_rejected() {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let result = service(&transport, &cache)
            .call_service(cached_definition(), String::new(), CancellationToken::new(), no_params())
            .await;
        assert!(matches!(result, Err(CallError::Token(_))));
    }
}
