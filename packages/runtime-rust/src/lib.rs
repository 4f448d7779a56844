//! Conduit runtime: exchange dispatch, channel listener and sender, resilient
//! internal invocations and pluggable call-context stores.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod invoke;
pub mod mapping;
pub mod store;
pub mod telemetry;
pub mod traits;

pub use catalog::StaticCatalog;
pub use channel::{ChannelListener, ChannelSender, ExchangeHandler, LocalTransport};
pub use config::RuntimeConfig;
pub use dispatch::{CommandRegistry, ExchangeDispatcher};
pub use invoke::{OperationProxy, ResilienceController, SingleTryController};
pub use mapping::HeaderProjection;
pub use store::{open_store, CallContextStore};
pub use traits::{
    HeaderMapper, ParticipantDirectory, PolicyRegistry, ServiceDescriptionResolver, Transport,
};
