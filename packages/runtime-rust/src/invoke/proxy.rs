//! Operation proxy: the retry loop of internal consumer calls.
//!
//! While the controller yields attempts, the proxy builds the request
//! message, runs the controller's pre-processing hooks, sends the exchange
//! synchronously and inspects the answer. A failed attempt goes through
//! [`ResilienceController::handle_exception`]; once attempts run out,
//! [`ResilienceController::handle_failure`] produces the error raised to the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{
    BusError, BusResult, CallContext, Content, Exchange, ExchangeStatus, NormalizedMessage, QName,
    IN, OUT,
};
use tracing::{debug, warn};

use super::controller::{Attempt, ResilienceController, ServiceTarget};
use crate::channel::ChannelSender;
use crate::traits::HeaderMapper;

/// Answer of a successful in-out invocation.
#[derive(Debug, Clone)]
pub struct InvocationReply {
    pub message: NormalizedMessage,
    /// Call context updated from the reply headers.
    pub context: CallContext,
}

pub struct OperationProxy {
    sender: Arc<ChannelSender>,
    mapper: Arc<dyn HeaderMapper>,
}

/// Timeouts of 1 ms or less mean the transport's own policy applies.
pub(crate) fn effective_timeout(call_timeout_ms: u64) -> Option<Duration> {
    (call_timeout_ms > 1).then(|| Duration::from_millis(call_timeout_ms))
}

impl OperationProxy {
    #[must_use]
    pub fn new(sender: Arc<ChannelSender>, mapper: Arc<dyn HeaderMapper>) -> Self {
        Self { sender, mapper }
    }

    /// Invokes a request-response operation.
    ///
    /// # Errors
    ///
    /// Returns the controller's creation error, or the error produced by
    /// [`ResilienceController::handle_failure`] once attempts run out.
    pub async fn invoke_in_out(
        &self,
        controller: &dyn ResilienceController,
        targets: &[ServiceTarget],
        operation: &QName,
        payload: Content,
    ) -> BusResult<InvocationReply> {
        let timeout = effective_timeout(controller.call_timeout_ms());
        let mut failures = Vec::new();

        while let Some(attempt) = controller.create_in_out_exchange(targets, operation)? {
            metrics::counter!("conduit_invocation_attempts", "pattern" => "in-out").increment(1);
            match self
                .attempt_in_out(controller, attempt, payload.clone(), timeout)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(error) => Self::record(controller, operation, error, &mut failures),
            }
        }
        Err(controller.handle_failure(failures))
    }

    /// Invokes a one-way operation and waits for its completion.
    ///
    /// # Errors
    ///
    /// Fails like [`OperationProxy::invoke_in_out`].
    pub async fn invoke_in_only(
        &self,
        controller: &dyn ResilienceController,
        targets: &[ServiceTarget],
        operation: &QName,
        payload: Content,
    ) -> BusResult<()> {
        let timeout = effective_timeout(controller.call_timeout_ms());
        let mut failures = Vec::new();

        while let Some(attempt) = controller.create_in_only_exchange(targets, operation)? {
            metrics::counter!("conduit_invocation_attempts", "pattern" => "in-only").increment(1);
            match self
                .attempt_in_only(controller, attempt, payload.clone(), timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => Self::record(controller, operation, error, &mut failures),
            }
        }
        Err(controller.handle_failure(failures))
    }

    fn record(
        controller: &dyn ResilienceController,
        operation: &QName,
        error: BusError,
        failures: &mut Vec<BusError>,
    ) {
        warn!(%operation, kind = %error.kind(), %error, "invocation attempt failed");
        match controller.handle_exception(error) {
            Some(kept) => failures.push(kept),
            None => debug!(%operation, "attempt failure swallowed by controller"),
        }
    }

    async fn send_attempt(
        &self,
        controller: &dyn ResilienceController,
        attempt: Attempt,
        payload: Content,
        timeout: Option<Duration>,
    ) -> BusResult<Exchange> {
        let Attempt {
            mut exchange,
            description,
        } = attempt;
        let mut request = NormalizedMessage::new(payload);
        controller.preprocess_message(&mut request)?;
        exchange.set_message(IN, request);
        controller.preprocess_exchange(&mut exchange)?;

        debug!(exchange = %exchange.id(), operation = %description.name, "sending attempt");
        self.sender.send_sync(exchange, timeout).await
    }

    async fn attempt_in_out(
        &self,
        controller: &dyn ResilienceController,
        attempt: Attempt,
        payload: Content,
        timeout: Option<Duration>,
    ) -> BusResult<InvocationReply> {
        let mut answer = self
            .send_attempt(controller, attempt, payload, timeout)
            .await?;
        let result = self.read_reply(controller, &mut answer);
        controller.finalize_exchange(&answer);

        if !answer.status().is_terminal() {
            let id = answer.id().clone();
            if let Err(e) = self.sender.ack(answer).await {
                warn!(exchange = %id, error = %e, "failed to complete answered exchange");
            }
        }
        result
    }

    fn read_reply(
        &self,
        controller: &dyn ResilienceController,
        answer: &mut Exchange,
    ) -> BusResult<InvocationReply> {
        if answer.status() == ExchangeStatus::Error {
            return Err(controller.handle_error(answer));
        }
        controller.postprocess_exchange(answer)?;

        let fault = answer.fault().cloned();
        let out = answer.take_message(OUT);
        let Some(message) = controller.postprocess_message(out, fault)? else {
            return Err(BusError::infrastructure(format!(
                "answer to exchange {} carries neither a reply nor a fault",
                answer.id()
            )));
        };

        let Some(mut context) = answer.context().cloned() else {
            return Err(BusError::protocol_violation(format!(
                "answer to exchange {} carries no call context",
                answer.id()
            )));
        };
        self.mapper.map_incoming_response(&message, &mut context)?;
        Ok(InvocationReply { message, context })
    }

    async fn attempt_in_only(
        &self,
        controller: &dyn ResilienceController,
        attempt: Attempt,
        payload: Content,
        timeout: Option<Duration>,
    ) -> BusResult<()> {
        let mut answer = self
            .send_attempt(controller, attempt, payload, timeout)
            .await?;
        let result = if answer.status() == ExchangeStatus::Error {
            Err(controller.handle_error(&answer))
        } else {
            controller.postprocess_exchange(&mut answer)
        };
        controller.finalize_exchange(&answer);
        result
    }
}
