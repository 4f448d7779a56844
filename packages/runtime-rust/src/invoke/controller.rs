//! Resilience controller contract.
//!
//! A controller decides how many attempts an invocation gets and against
//! which targets. Each attempt is a value ([`Attempt`]) carrying a fresh
//! exchange; the retry loop itself lives in
//! [`OperationProxy`](super::OperationProxy).

use conduit_core::{
    BusError, BusResult, EndpointRef, Exchange, Fault, NormalizedMessage, OperationDescription,
    QName,
};

/// A service an invocation may be routed to, optionally pinned to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: QName,
    pub endpoint: Option<EndpointRef>,
}

impl ServiceTarget {
    #[must_use]
    pub fn service(service: QName) -> Self {
        Self {
            service,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn endpoint(endpoint: EndpointRef) -> Self {
        Self {
            service: endpoint.service.clone(),
            endpoint: Some(endpoint),
        }
    }
}

/// One attempt of an invocation.
#[derive(Debug)]
pub struct Attempt {
    /// Fresh exchange carrying a seeded call context.
    pub exchange: Exchange,
    pub description: OperationDescription,
}

pub trait ResilienceController: Send + Sync {
    /// Next in-only attempt, or `None` once the retry policy is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the error raised while resolving the operation.
    fn create_in_only_exchange(
        &self,
        targets: &[ServiceTarget],
        operation: &QName,
    ) -> BusResult<Option<Attempt>>;

    /// Next in-out attempt, or `None` once the retry policy is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the error raised while resolving the operation.
    fn create_in_out_exchange(
        &self,
        targets: &[ServiceTarget],
        operation: &QName,
    ) -> BusResult<Option<Attempt>>;

    /// # Errors
    ///
    /// An error fails the current attempt.
    fn preprocess_exchange(&self, _exchange: &mut Exchange) -> BusResult<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// An error fails the current attempt.
    fn preprocess_message(&self, _message: &mut NormalizedMessage) -> BusResult<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// An error fails the current attempt.
    fn postprocess_exchange(&self, _exchange: &mut Exchange) -> BusResult<()> {
        Ok(())
    }

    /// Turns the answer of an in-out attempt into the reply message.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProviderFault` when the provider answered with a fault.
    fn postprocess_message(
        &self,
        out: Option<NormalizedMessage>,
        fault: Option<Fault>,
    ) -> BusResult<Option<NormalizedMessage>> {
        match fault {
            Some(fault) => Err(BusError::from(fault)),
            None => Ok(out),
        }
    }

    /// Error to raise for an answer in `Error` status.
    fn handle_error(&self, exchange: &Exchange) -> BusError {
        let detail = exchange
            .failure()
            .map_or_else(|| "no failure attached".to_string(), ToString::to_string);
        BusError::communication(format!(
            "exchange {} ended in error: {detail}",
            exchange.id()
        ))
    }

    /// Decides whether a failed attempt is recorded. `None` swallows it.
    fn handle_exception(&self, error: BusError) -> Option<BusError> {
        Some(error)
    }

    /// Error raised once no attempt is left.
    ///
    /// A trailing provider fault is surfaced as is, so business callers see
    /// the fault rather than an aggregate.
    fn handle_failure(&self, mut failures: Vec<BusError>) -> BusError {
        if failures
            .last()
            .is_some_and(|last| last.fault().is_some())
        {
            if let Some(fault) = failures.pop() {
                return fault;
            }
        }
        BusError::RetriesExhausted { failures }
    }

    /// Runs after each attempt, successful or not, once an answer arrived.
    fn finalize_exchange(&self, _exchange: &Exchange) {}

    /// Synchronous call timeout. 1 ms or less means no explicit timeout.
    fn call_timeout_ms(&self) -> u64;
}
