//! Exchange dispatcher.
//!
//! Takes an accepted exchange through its conversation state: ensures a call
//! context, resolves the operation, classifies the exchange (see
//! [`classify`]), stamps role and scope into the context, maps the incoming
//! headers and attaches the agreed policy. The command built for the operation
//! then runs through the command pipeline, and its outcome is shipped back
//! through the [`ChannelSender`].
//!
//! Dispatch never fails: every error refuses the exchange back to the
//! transport.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{
    BusError, BusResult, CallContext, ClockSource, EndpointRef, Exchange, OperationDescription,
    Participant, QName, Scope, SystemClock, IN, OUT,
};
use tower::ServiceExt;
use tracing::{debug, error, field, info_span, Instrument, Span};

use super::classify::{classify, Classification};
use super::command::{
    CommandFactory, CommandFailure, CommandRequest, CommandResponse, Disposition, Interceptor,
};
use super::middleware::build_command_pipeline;
use crate::channel::{ChannelSender, ExchangeHandler};
use crate::traits::{
    HeaderMapper, ParticipantDirectory, PolicyRegistry, ServiceDescriptionResolver,
};

pub struct ExchangeDispatcher {
    sender: Arc<ChannelSender>,
    resolver: Arc<dyn ServiceDescriptionResolver>,
    mapper: Arc<dyn HeaderMapper>,
    policies: Arc<dyn PolicyRegistry>,
    participants: Arc<dyn ParticipantDirectory>,
    commands: Arc<dyn CommandFactory>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    clock: Arc<dyn ClockSource>,
    provider_id: Option<String>,
}

impl ExchangeDispatcher {
    #[must_use]
    pub fn new(
        sender: Arc<ChannelSender>,
        resolver: Arc<dyn ServiceDescriptionResolver>,
        mapper: Arc<dyn HeaderMapper>,
        policies: Arc<dyn PolicyRegistry>,
        participants: Arc<dyn ParticipantDirectory>,
        commands: Arc<dyn CommandFactory>,
    ) -> Self {
        Self {
            sender,
            resolver,
            mapper,
            policies,
            participants,
            commands,
            interceptors: Vec::new(),
            clock: Arc::new(SystemClock),
            provider_id: None,
        }
    }

    /// Identifier stamped into contexts this dispatcher creates.
    #[must_use]
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Processes one inbound exchange to completion.
    pub async fn dispatch(&self, exchange: Exchange) {
        let span = info_span!(
            "dispatch",
            exchange = %exchange.id(),
            operation = field::Empty,
            state = field::Empty,
        );
        async move {
            let outcome = match self.prepare(exchange) {
                Ok(request) => self.execute(request).await,
                Err(failure) => Err(failure),
            };
            self.ship(outcome).await;
        }
        .instrument(span)
        .await;
    }

    fn prepare(&self, mut exchange: Exchange) -> Result<CommandRequest, CommandFailure> {
        match self.classify_and_stamp(&mut exchange) {
            Ok((description, classification)) => {
                let span = Span::current();
                span.record("operation", field::display(&description.name));
                span.record("state", classification.state.as_str());
                Ok(CommandRequest {
                    exchange,
                    description,
                    classification,
                    started_at: self.clock.now(),
                })
            }
            Err(error) => Err(CommandFailure { exchange, error }),
        }
    }

    fn classify_and_stamp(
        &self,
        exchange: &mut Exchange,
    ) -> BusResult<(OperationDescription, Classification)> {
        let Some(operation) = exchange.operation.clone() else {
            return Err(BusError::configuration(format!(
                "exchange {} names no operation",
                exchange.id()
            )));
        };
        let Some(service) = exchange.service.clone() else {
            return Err(BusError::configuration(format!(
                "exchange {} names no service",
                exchange.id()
            )));
        };

        if exchange.context().is_none() {
            let participant = self.participant_of(exchange)?;
            let mut ctx = CallContext::begin();
            ctx.provider_id.clone_from(&self.provider_id);
            ctx.exchange_id = Some(exchange.id().to_string());
            ctx.operation = Some(operation.local.clone());
            ctx.participant = Some(participant);
            exchange.attach_context(ctx)?;
            debug!(exchange = %exchange.id(), "created call context");
        }

        let description = self.resolve(exchange.endpoint.as_ref(), &service, &operation)?;
        let classification = classify(exchange.role(), description.is_partner_operation());

        let Some(mut ctx) = exchange.context().cloned() else {
            return Err(BusError::protocol_violation(format!(
                "exchange {} lost its call context",
                exchange.id()
            )));
        };
        ctx.service = Some(service.clone());
        ctx.operation = Some(description.name.local.clone());
        ctx.partner_operation = description
            .partner_operation
            .as_ref()
            .map(|partner| partner.local.clone());
        ctx.style = description.communication_style();
        ctx.scope = Some(classification.scope);
        ctx.role = Some(classification.role);
        if ctx.action.is_none() {
            ctx.action.clone_from(&description.action);
        }

        match classification.scope {
            Scope::Request => {
                if let Some(msg) = exchange.message(IN) {
                    self.mapper.map_incoming_request(msg, &mut ctx)?;
                }
            }
            // A callback carries its payload in the in slot.
            Scope::Response => {
                if let Some(msg) = exchange.message(OUT).or_else(|| exchange.message(IN)) {
                    self.mapper.map_incoming_response(msg, &mut ctx)?;
                }
            }
        }

        if ctx.policy.is_none() {
            ctx.policy = self
                .policies
                .agreed_policy(&service)
                .map(|policy| policy.reduce_to_operation(&description.name.local));
        }

        if let Some(slot) = exchange.context_mut() {
            *slot = ctx;
        }
        Ok((description, classification))
    }

    fn participant_of(&self, exchange: &Exchange) -> BusResult<Participant> {
        exchange
            .endpoint
            .as_ref()
            .and_then(|endpoint| self.participants.participant_for(endpoint))
            .or_else(|| self.sender.sent_participant(exchange.id()))
            .ok_or_else(|| {
                BusError::configuration(format!(
                    "no participant resolvable for exchange {}",
                    exchange.id()
                ))
            })
    }

    fn resolve(
        &self,
        endpoint: Option<&EndpointRef>,
        service: &QName,
        operation: &QName,
    ) -> BusResult<OperationDescription> {
        if let Some(description) =
            endpoint.and_then(|endpoint| self.resolver.endpoint_operation(endpoint, operation))
        {
            return Ok(description);
        }
        self.resolver.operation(service, operation)
    }

    async fn execute(&self, request: CommandRequest) -> Result<CommandResponse, CommandFailure> {
        let built = match request.context() {
            Some(ctx) => self.commands.build(&request.description, ctx),
            None => Err(BusError::protocol_violation(format!(
                "exchange {} reached its command without a call context",
                request.exchange.id()
            ))),
        };
        let command = match built {
            Ok(command) => command,
            Err(error) => return Err(request.fail(error)),
        };
        build_command_pipeline(command, self.interceptors.clone())
            .oneshot(request)
            .await
    }

    async fn ship(&self, outcome: Result<CommandResponse, CommandFailure>) {
        let (id, result) = match outcome {
            Ok(CommandResponse {
                mut exchange,
                disposition: Disposition::Reply,
            }) => {
                if let Some(ctx) = exchange.context_mut() {
                    ctx.scope = Some(Scope::Response);
                }
                (exchange.id().clone(), self.sender.send(exchange).await)
            }
            Ok(CommandResponse {
                exchange,
                disposition: Disposition::Complete,
            }) => (exchange.id().clone(), self.sender.ack(exchange).await),
            Err(CommandFailure { exchange, error }) => (
                exchange.id().clone(),
                self.sender.refuse_with_error(exchange, &error).await,
            ),
        };
        if let Err(e) = result {
            error!(exchange = %id, error = %e, "failed to return exchange to transport");
        }
    }
}

#[async_trait]
impl ExchangeHandler for ExchangeDispatcher {
    async fn handle(&self, exchange: Exchange) {
        self.dispatch(exchange).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
