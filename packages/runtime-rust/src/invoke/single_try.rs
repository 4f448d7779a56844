//! Single-try controller used for internal consumer calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_core::{
    BusError, BusResult, CallContext, EndpointRef, Exchange, ExchangePattern,
    OperationDescription, Participant, QName, Role, Scope,
};
use parking_lot::Mutex;
use tracing::debug;

use super::controller::{Attempt, ResilienceController, ServiceTarget};
use crate::traits::{PolicyRegistry, ServiceDescriptionResolver};

/// Resolved metadata of one operation and the way to build exchanges for it.
#[derive(Debug, Clone)]
pub struct CachedOperation {
    pub description: OperationDescription,
    pub service: QName,
    pub endpoint: Option<EndpointRef>,
}

impl CachedOperation {
    /// Builds a new consumer-side exchange addressed to the operation.
    #[must_use]
    pub fn new_exchange(&self, pattern: ExchangePattern) -> Exchange {
        let mut exchange = Exchange::new(pattern);
        exchange.service = Some(self.service.clone());
        exchange.operation = Some(self.description.name.clone());
        exchange.endpoint.clone_from(&self.endpoint);
        exchange
    }
}

/// Operation metadata shared by every controller built from the same cache.
///
/// The lock is held across first-time resolution, so concurrent callers of
/// one operation resolve it once.
#[derive(Clone, Default)]
pub struct OperationCache {
    entries: Arc<Mutex<HashMap<QName, CachedOperation>>>,
}

impl OperationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn resolve(
        &self,
        resolver: &dyn ServiceDescriptionResolver,
        targets: &[ServiceTarget],
        operation: &QName,
    ) -> BusResult<CachedOperation> {
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(operation) {
            return Ok(cached.clone());
        }

        let Some(target) = targets.first() else {
            return Err(BusError::illegal_input(format!(
                "no target service given for operation {operation}"
            )));
        };
        let description = match target
            .endpoint
            .as_ref()
            .and_then(|endpoint| resolver.endpoint_operation(endpoint, operation))
        {
            Some(description) => description,
            None => resolver.operation(&target.service, operation)?,
        };
        debug!(%operation, service = %target.service, "resolved operation metadata");

        let cached = CachedOperation {
            description,
            service: target.service.clone(),
            endpoint: target.endpoint.clone(),
        };
        entries.insert(operation.clone(), cached.clone());
        Ok(cached)
    }
}

/// Builds exactly one exchange per instance.
pub struct SingleTryController {
    resolver: Arc<dyn ServiceDescriptionResolver>,
    policies: Arc<dyn PolicyRegistry>,
    cache: OperationCache,
    provider_id: Option<String>,
    participant: Option<Participant>,
    call_timeout_ms: u64,
    used: AtomicBool,
}

impl SingleTryController {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn ServiceDescriptionResolver>,
        policies: Arc<dyn PolicyRegistry>,
        cache: OperationCache,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            resolver,
            policies,
            cache,
            provider_id: None,
            participant: None,
            call_timeout_ms,
            used: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Identity of the calling participant, stamped into the context.
    #[must_use]
    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participant = Some(participant);
        self
    }

    fn create(
        &self,
        targets: &[ServiceTarget],
        operation: &QName,
        pattern: ExchangePattern,
    ) -> BusResult<Option<Attempt>> {
        if self.used.swap(true, Ordering::AcqRel) {
            debug!(%operation, "single-try controller already produced its exchange");
            return Ok(None);
        }

        let cached = self
            .cache
            .resolve(self.resolver.as_ref(), targets, operation)?;
        let description = cached.description.clone();

        let mut ctx = CallContext::begin();
        ctx.operation = Some(description.name.local.clone());
        ctx.service = Some(cached.service.clone());
        ctx.action.clone_from(&description.action);
        ctx.provider_id.clone_from(&self.provider_id);
        ctx.participant.clone_from(&self.participant);
        ctx.style = description.communication_style();
        ctx.scope = Some(Scope::Request);
        ctx.role = Some(Role::Sender);
        ctx.policy = self
            .policies
            .agreed_policy(&cached.service)
            .map(|policy| policy.reduce_to_operation(&description.name.local));

        let mut exchange = cached.new_exchange(pattern);
        ctx.exchange_id = Some(exchange.id().to_string());
        exchange.attach_context(ctx)?;
        Ok(Some(Attempt {
            exchange,
            description,
        }))
    }
}

impl ResilienceController for SingleTryController {
    fn create_in_only_exchange(
        &self,
        targets: &[ServiceTarget],
        operation: &QName,
    ) -> BusResult<Option<Attempt>> {
        self.create(targets, operation, ExchangePattern::InOnly)
    }

    fn create_in_out_exchange(
        &self,
        targets: &[ServiceTarget],
        operation: &QName,
    ) -> BusResult<Option<Attempt>> {
        self.create(targets, operation, ExchangePattern::InOut)
    }

    fn call_timeout_ms(&self) -> u64 {
        self.call_timeout_ms
    }
}
