//! Command types flowing through the dispatch pipeline.
//!
//! A command is a `tower` service from [`CommandRequest`] to
//! [`CommandResponse`]. Failures carry the exchange back so the dispatcher can
//! refuse it.

use async_trait::async_trait;
use conduit_core::{
    AgreedPolicy, BusError, BusResult, CallContext, Exchange, OperationDescription,
};
use tower::util::BoxService;
use tracing::info;

use super::classify::Classification;

/// An exchange ready to be processed by its operation's command.
#[derive(Debug)]
pub struct CommandRequest {
    pub exchange: Exchange,
    pub description: OperationDescription,
    pub classification: Classification,
    /// Millisecond timestamp at which dispatch handed the exchange over.
    pub started_at: u64,
}

impl CommandRequest {
    #[must_use]
    pub fn context(&self) -> Option<&CallContext> {
        self.exchange.context()
    }

    #[must_use]
    pub fn policy(&self) -> Option<&AgreedPolicy> {
        self.context().and_then(|ctx| ctx.policy.as_ref())
    }

    /// Fails the request, handing the exchange back.
    #[must_use]
    pub fn fail(self, error: BusError) -> CommandFailure {
        CommandFailure {
            exchange: self.exchange,
            error,
        }
    }
}

/// How the dispatcher ships a processed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send the exchange back carrying its reply.
    Reply,
    /// Mark the exchange done.
    Complete,
}

#[derive(Debug)]
pub struct CommandResponse {
    pub exchange: Exchange,
    pub disposition: Disposition,
}

impl CommandResponse {
    #[must_use]
    pub fn reply(exchange: Exchange) -> Self {
        Self {
            exchange,
            disposition: Disposition::Reply,
        }
    }

    #[must_use]
    pub fn complete(exchange: Exchange) -> Self {
        Self {
            exchange,
            disposition: Disposition::Complete,
        }
    }

    #[must_use]
    pub fn fail(self, error: BusError) -> CommandFailure {
        CommandFailure {
            exchange: self.exchange,
            error,
        }
    }
}

/// A failed command together with the exchange it was processing.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct CommandFailure {
    pub exchange: Exchange,
    #[source]
    pub error: BusError,
}

/// A type-erased command.
pub type BoxCommand = BoxService<CommandRequest, CommandResponse, CommandFailure>;

/// Wraps an async function as a [`BoxCommand`].
pub fn command_fn<F, Fut>(f: F) -> BoxCommand
where
    F: FnMut(CommandRequest) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<CommandResponse, CommandFailure>> + Send + 'static,
{
    BoxService::new(tower::service_fn(f))
}

/// Builds the command processing one operation.
pub trait CommandFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns `BusError::Configuration` if no command handles the operation.
    fn build(&self, description: &OperationDescription, ctx: &CallContext) -> BusResult<BoxCommand>;
}

/// Policy-driven processing step around a command.
///
/// Interceptors are selected per exchange by the agreed policy attached to
/// its call context.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, policy: &AgreedPolicy) -> bool;

    /// Runs before the command.
    async fn on_request(&self, request: &mut CommandRequest) -> BusResult<()>;

    /// Runs after the command succeeded.
    async fn on_reply(&self, response: &mut CommandResponse) -> BusResult<()>;
}

/// Property set on exchanges processed under a tracking assertion.
pub const TRACKED_PROPERTY: &str = "conduit.tracked";

/// Logs tracked exchanges and marks them with [`TRACKED_PROPERTY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingInterceptor;

#[async_trait]
impl Interceptor for TrackingInterceptor {
    fn name(&self) -> &str {
        "tracking"
    }

    fn applies_to(&self, policy: &AgreedPolicy) -> bool {
        policy.requires("tracking")
    }

    async fn on_request(&self, request: &mut CommandRequest) -> BusResult<()> {
        let exchange = &mut request.exchange;
        info!(
            exchange = %exchange.id(),
            state = request.classification.state.as_str(),
            operation = %request.description.name,
            "tracked exchange received"
        );
        exchange
            .properties
            .insert(TRACKED_PROPERTY.to_string(), "true".to_string());
        Ok(())
    }

    async fn on_reply(&self, response: &mut CommandResponse) -> BusResult<()> {
        info!(
            exchange = %response.exchange.id(),
            disposition = ?response.disposition,
            "tracked exchange processed"
        );
        Ok(())
    }
}
