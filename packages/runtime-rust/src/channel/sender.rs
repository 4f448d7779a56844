//! Outbound side of the channel.
//!
//! Every exchange leaving through [`ChannelSender::send`] or
//! [`ChannelSender::send_sync`] is shaped first: its call context and scope
//! are checked, the protocol action is attached, the context is projected into
//! the headers of the message the scope addresses, and every payload is
//! normalized to its serialized form. Shaping completes before any transport
//! I/O, so a malformed exchange never reaches the wire.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use conduit_core::{
    BusError, BusResult, Content, Exchange, ExchangeFailure, ExchangeId, Participant, Scope, IN,
    OUT,
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::SenderConfig;
use crate::traits::{HeaderMapper, Transport};

pub struct ChannelSender {
    transport: Arc<dyn Transport>,
    mapper: Arc<dyn HeaderMapper>,
    config: SenderConfig,
    /// Participants of exchanges this side sent and still expects back.
    sent: DashMap<ExchangeId, Participant>,
}

impl ChannelSender {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        mapper: Arc<dyn HeaderMapper>,
        config: SenderConfig,
    ) -> Self {
        Self {
            transport,
            mapper,
            config,
            sent: DashMap::new(),
        }
    }

    /// Shapes and sends an exchange without waiting for an answer.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProtocolViolation` if the exchange has no call
    /// context or the context has no scope, `BusError::IllegalInput` if a
    /// payload cannot be normalized, or the transport's error.
    pub async fn send(&self, mut exchange: Exchange) -> BusResult<()> {
        self.shape(&mut exchange)?;
        self.remember_participant(&exchange);
        debug!(exchange = %exchange.id(), "sending exchange");
        self.transport.send(exchange).await
    }

    /// Shapes and sends an exchange, then waits for the answered exchange.
    ///
    /// `timeout = None` falls back to the configured default, and without one
    /// leaves the wait to the transport.
    ///
    /// # Errors
    ///
    /// Fails like [`ChannelSender::send`]; additionally returns
    /// `BusError::Infrastructure` naming the service and operation if no
    /// answer arrived.
    pub async fn send_sync(
        &self,
        mut exchange: Exchange,
        timeout: Option<Duration>,
    ) -> BusResult<Exchange> {
        self.shape(&mut exchange)?;
        let id = exchange.id().clone();
        let service = exchange
            .service
            .as_ref()
            .map_or_else(|| "<unknown service>".to_string(), ToString::to_string);
        let operation = exchange
            .operation
            .as_ref()
            .map_or_else(|| "<unknown operation>".to_string(), ToString::to_string);
        let timeout = timeout.or_else(|| self.config.default_sync_timeout());

        debug!(exchange = %id, ?timeout, "sending exchange synchronously");
        let answer = self.transport.send_sync(exchange, timeout).await?;
        answer.ok_or_else(|| {
            BusError::infrastructure(format!(
                "no answer for operation {operation} of service {service} (exchange {id})"
            ))
        })
    }

    /// Completes an exchange and hands it back to the transport.
    ///
    /// An exchange that is already terminal is released without I/O. Either
    /// way the conversation is over for this side, so its journal entry goes.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn ack(&self, mut exchange: Exchange) -> BusResult<()> {
        self.forget(exchange.id());
        if exchange.status().is_terminal() {
            debug!(exchange = %exchange.id(), status = ?exchange.status(), "released terminal exchange");
            return Ok(());
        }
        exchange.complete()?;
        self.transport.send(exchange).await
    }

    /// Fails an exchange with `error` and hands it back to the transport.
    ///
    /// Any half-built reply is dropped first.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProtocolViolation` if the exchange is already
    /// terminal, or the transport's error.
    pub async fn refuse_with_error(&self, mut exchange: Exchange, error: &BusError) -> BusResult<()> {
        warn!(exchange = %exchange.id(), kind = %error.kind(), %error, "refusing exchange");
        metrics::counter!("conduit_exchanges_refused", "kind" => error.kind().to_string())
            .increment(1);
        self.forget(exchange.id());
        exchange.clear_reply();
        exchange.fail(ExchangeFailure::from(error))?;
        self.transport.send(exchange).await
    }

    /// Releases a `Done` notification for an exchange this side sent.
    pub fn acknowledge_completion(&self, exchange: &Exchange) {
        self.forget(exchange.id());
        debug!(exchange = %exchange.id(), "peer completed exchange");
    }

    /// Drops the journal entry of exchange `id`, if this side recorded one.
    pub fn forget(&self, id: &ExchangeId) {
        if self.sent.remove(id).is_some() {
            debug!(exchange = %id, "released sent participant");
        }
    }

    /// Participant recorded when this side sent the exchange `id`.
    #[must_use]
    pub fn sent_participant(&self, id: &ExchangeId) -> Option<Participant> {
        self.sent.get(id).map(|entry| entry.value().clone())
    }

    fn remember_participant(&self, exchange: &Exchange) {
        if let Some(participant) = exchange.context().and_then(|ctx| ctx.participant.clone()) {
            self.sent.insert(exchange.id().clone(), participant);
        }
    }

    fn shape(&self, exchange: &mut Exchange) -> BusResult<()> {
        let Some(ctx) = exchange.context().cloned() else {
            return Err(BusError::protocol_violation(format!(
                "exchange {} carries no call context",
                exchange.id()
            )));
        };
        let Some(scope) = ctx.scope else {
            return Err(BusError::protocol_violation(format!(
                "call context of exchange {} has no scope",
                exchange.id()
            )));
        };

        if let Some(action) = &ctx.action {
            exchange.action = Some(action.clone());
        }

        match scope {
            Scope::Request => {
                if let Some(msg) = exchange.message_mut(IN) {
                    self.mapper.map_outgoing_request(&ctx, msg)?;
                }
            }
            Scope::Response => {
                if let Some(msg) = exchange.message_mut(OUT) {
                    self.mapper.map_outgoing_response(&ctx, msg)?;
                }
            }
        }

        for content in exchange.contents_mut() {
            let current = std::mem::replace(content, Content::Stream(Bytes::new()));
            *content = current.into_stream()?;
        }
        Ok(())
    }
}
