//! Channel: the transport-facing side of the runtime.
//!
//! - [`sender`]: shaping and sending of outbound exchanges
//! - [`listener`]: the polling task feeding accepted exchanges to the pool
//! - [`pool`]: bounded direct hand-off worker pool
//! - [`lifecycle`]: listener run state and in-flight tracking
//! - [`local`]: in-process loopback transport

pub mod lifecycle;
pub mod listener;
pub mod local;
pub mod pool;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{InFlightGuard, ListenerLifecycle, ListenerState};
pub use listener::{ChannelListener, ExchangeHandler};
pub use local::LocalTransport;
pub use pool::{Job, PoolError, WorkerPool};
pub use sender::ChannelSender;
