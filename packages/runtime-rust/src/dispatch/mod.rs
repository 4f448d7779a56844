//! Exchange dispatch.
//!
//! - [`classify`]: role, scope and state of an inbound exchange
//! - [`command`]: command request/response types, factory and interceptor traits
//! - [`registry`]: operation-keyed command factory
//! - [`middleware`]: the tower pipeline wrapped around every command
//! - [`dispatcher`]: the [`ExchangeDispatcher`] driving an exchange end to end

pub mod classify;
pub mod command;
pub mod dispatcher;
pub mod middleware;
pub mod registry;

pub use classify::{classify, Classification, DispatchState};
pub use command::{
    command_fn, BoxCommand, CommandFactory, CommandFailure, CommandRequest, CommandResponse,
    Disposition, Interceptor, TrackingInterceptor, TRACKED_PROPERTY,
};
pub use dispatcher::ExchangeDispatcher;
pub use registry::CommandRegistry;
