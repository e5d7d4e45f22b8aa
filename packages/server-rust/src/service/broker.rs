//! Service broker: fans a batch of calls out under one deadline.
//!
//! Every call of a batch runs on its own task and shares a
//! [`CancellationToken`]. The batch returns when all calls have finished or
//! the deadline passes, whichever comes first. Calls still running at that
//! point are reported as `Timeout`, then cancelled and left to wind down (and
//! finish warming the cache) without holding up the caller.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use broker_core::{
    BrokerResponse, Cache, PostParameter, ServiceCallResult, ServiceDefinition, ServiceId,
};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use super::domain::{BrokeredService, CallError};
use super::router::KindRouter;
use crate::traits::{ServiceRepository, TaskScheduler};

/// Errors surfaced by the broker itself. Per-service failures are results.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to load service definitions: {0}")]
    Repository(#[source] anyhow::Error),
}

/// How a single call of a batch ended.
enum Outcome {
    Finished(Result<Option<ServiceCallResult>, CallError>),
    Panicked,
}

type Slot = Arc<Mutex<Option<Outcome>>>;

/// Aggregates calls to heterogeneous downstream services.
#[derive(Clone)]
pub struct ServiceBroker {
    pub(super) repository: Arc<dyn ServiceRepository>,
    router: KindRouter,
    pub(super) cache: Arc<dyn Cache>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl ServiceBroker {
    #[must_use]
    pub fn new(
        repository: Arc<dyn ServiceRepository>,
        router: KindRouter,
        cache: Arc<dyn Cache>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        Self {
            repository,
            router,
            cache,
            scheduler,
        }
    }

    /// Calls every service resolved from `ids` and waits at most `timeout`.
    ///
    /// Returns `Ok(None)` when `ids` is empty. Otherwise there is one result
    /// per resolved definition whose kind is routable, in resolution order;
    /// calls that did not finish in time are reported as `Timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Repository`] if the definitions cannot be loaded.
    pub async fn call_services(
        &self,
        ids: &[ServiceId],
        region: &str,
        timeout: Duration,
    ) -> Result<Option<BrokerResponse>, BrokerError> {
        self.dispatch(ids, region, timeout, Arc::from(Vec::new()))
            .await
    }

    /// Calls a single service or the service owning a token.
    ///
    /// Yields an `Error` result for `id` when nothing could be called.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Repository`] if the definitions cannot be loaded.
    pub async fn call_service(
        &self,
        id: ServiceId,
        region: &str,
        timeout: Duration,
        additional_parameters: Vec<PostParameter>,
    ) -> Result<ServiceCallResult, BrokerError> {
        let response = self
            .dispatch(&[id], region, timeout, Arc::from(additional_parameters))
            .await?;
        Ok(response
            .and_then(|response| response.service_responses.into_iter().next())
            .unwrap_or_else(|| ServiceCallResult::error(id)))
    }

    /// Queues a batch on the scheduler without waiting for it.
    pub fn start_background_service_calls(
        &self,
        ids: Vec<ServiceId>,
        region: String,
        timeout: Duration,
    ) {
        let broker = self.clone();
        self.scheduler.queue_background_work_item(Box::pin(async move {
            if let Err(e) = broker.call_services(&ids, &region, timeout).await {
                warn!(region = %region, error = %e, "background service calls failed");
            }
        }));
    }

    async fn dispatch(
        &self,
        ids: &[ServiceId],
        region: &str,
        timeout: Duration,
        additional_parameters: Arc<[PostParameter]>,
    ) -> Result<Option<BrokerResponse>, BrokerError> {
        if ids.is_empty() {
            return Ok(None);
        }

        let definitions = self
            .repository
            .services_and_tokens(ids)
            .await
            .map_err(BrokerError::Repository)?;

        let span = info_span!("batch", region, count = definitions.len());
        let responses = self
            .run_batch(definitions, region, timeout, additional_parameters)
            .instrument(span)
            .await;
        Ok(Some(BrokerResponse {
            service_responses: responses,
        }))
    }

    async fn run_batch(
        &self,
        definitions: Vec<ServiceDefinition>,
        region: &str,
        timeout: Duration,
        additional_parameters: Arc<[PostParameter]>,
    ) -> Vec<ServiceCallResult> {
        let cancel = CancellationToken::new();
        let mut slots: Vec<(ServiceId, Slot)> = Vec::with_capacity(definitions.len());
        let mut calls = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let Some(service) = self.router.route(&definition) else {
                debug!(service_id = %definition.id, kind = definition.kind_tag().as_str(), "no service for kind");
                continue;
            };
            let slot: Slot = Arc::new(Mutex::new(None));
            slots.push((definition.id, Arc::clone(&slot)));
            calls.push(tokio::spawn(
                call_into_slot(
                    service,
                    Arc::new(definition),
                    region.to_string(),
                    cancel.clone(),
                    Arc::clone(&additional_parameters),
                    slot,
                )
                .in_current_span(),
            ));
        }

        let deadline_reached = tokio::select! {
            biased;
            _ = join_all(calls.iter_mut()) => false,
            () = tokio::time::sleep(timeout) => true,
        };

        // Slots are emptied before cancelling so a call winding down after
        // the deadline cannot replace its `Timeout`.
        let results: Vec<ServiceCallResult> = slots
            .into_iter()
            .filter_map(|(service_id, slot)| settle(service_id, slot.lock().take()))
            .collect();
        cancel.cancel();

        if deadline_reached {
            let unfinished = calls.iter().filter(|call| !call.is_finished()).count();
            debug!(unfinished, "batch deadline reached");
        }
        results
    }
}

fn call_into_slot(
    service: Arc<dyn BrokeredService>,
    definition: Arc<ServiceDefinition>,
    region: String,
    cancel: CancellationToken,
    additional_parameters: Arc<[PostParameter]>,
    slot: Slot,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let call = service.call_service(definition, region, cancel, additional_parameters);
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => Outcome::Finished(result),
            Err(_) => Outcome::Panicked,
        };
        *slot.lock() = Some(outcome);
    })
}

/// Maps the terminal state of one call to its entry in the response.
fn settle(service_id: ServiceId, outcome: Option<Outcome>) -> Option<ServiceCallResult> {
    match outcome {
        Some(Outcome::Finished(Ok(result))) => result,
        Some(Outcome::Finished(Err(e))) => {
            warn!(%service_id, error = %e, "service call failed");
            Some(ServiceCallResult::error(service_id))
        }
        Some(Outcome::Panicked) => {
            error!(%service_id, "service call panicked");
            Some(ServiceCallResult::error(service_id))
        }
        None => Some(ServiceCallResult::timeout(service_id)),
    }
}
