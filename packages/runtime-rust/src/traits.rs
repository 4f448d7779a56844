use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    AgreedPolicy, BusResult, CallContext, EndpointRef, Exchange, NormalizedMessage,
    OperationDescription, Participant, QName,
};

/// Boundary to the underlying message transport.
///
/// The runtime treats the transport as an opaque request/response channel.
/// Implementations: in-process loopback ([`LocalTransport`](crate::channel::LocalTransport)),
/// HTTP/JMS bindings (external).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait up to `timeout` for an inbound exchange. `Ok(None)` on an idle poll.
    async fn accept(&self, timeout: Duration) -> BusResult<Option<Exchange>>;

    /// Hand an exchange to the transport without waiting for an answer.
    async fn send(&self, exchange: Exchange) -> BusResult<()>;

    /// Hand an exchange to the transport and wait for the answered exchange.
    ///
    /// Returns `Ok(None)` when no answer arrived (timeout or peer gone).
    /// `timeout = None` leaves the wait to the transport's own policy.
    async fn send_sync(
        &self,
        exchange: Exchange,
        timeout: Option<Duration>,
    ) -> BusResult<Option<Exchange>>;
}

/// Resolves operation metadata from service descriptions.
///
/// Resolution works on already-parsed descriptions and is synchronous, so
/// callers may hold a lock across it.
pub trait ServiceDescriptionResolver: Send + Sync {
    /// Resolve an operation of a service by qualified names.
    fn operation(&self, service: &QName, operation: &QName) -> BusResult<OperationDescription>;

    /// Resolve an operation from the description registered for a specific
    /// endpoint, if the endpoint has one.
    fn endpoint_operation(
        &self,
        _endpoint: &EndpointRef,
        _operation: &QName,
    ) -> Option<OperationDescription> {
        None
    }
}

/// Bidirectional projection between call-context fields and envelope headers.
pub trait HeaderMapper: Send + Sync {
    fn map_outgoing_request(&self, ctx: &CallContext, msg: &mut NormalizedMessage) -> BusResult<()>;

    fn map_outgoing_response(&self, ctx: &CallContext, msg: &mut NormalizedMessage)
        -> BusResult<()>;

    fn map_incoming_request(&self, msg: &NormalizedMessage, ctx: &mut CallContext) -> BusResult<()>;

    fn map_incoming_response(&self, msg: &NormalizedMessage, ctx: &mut CallContext)
        -> BusResult<()>;
}

/// Source of negotiated policies.
pub trait PolicyRegistry: Send + Sync {
    /// The agreed policy of a service, if one was negotiated.
    fn agreed_policy(&self, service: &QName) -> Option<AgreedPolicy>;
}

/// Maps active endpoints to the participant registered behind them.
pub trait ParticipantDirectory: Send + Sync {
    fn participant_for(&self, endpoint: &EndpointRef) -> Option<Participant>;
}
