//! Conduit core: exchanges, call contexts, agreed policies, operation metadata
//! and the error taxonomy shared by the runtime.

pub mod clock;
pub mod context;
pub mod description;
pub mod error;
pub mod exchange;
pub mod policy;
pub mod qname;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use context::{
    context_key, CallContext, CommunicationStyle, Participant, Role, Scope, Transport,
};
pub use description::{ExchangePattern, OperationDescription};
pub use error::{BoxError, BusError, BusResult, ContextNotFound, ErrorKind};
pub use exchange::{
    Content, EndpointRef, Exchange, ExchangeFailure, ExchangeId, ExchangeRole, ExchangeStatus,
    Fault, NormalizedMessage, IN, OUT,
};
pub use policy::{AgreedPolicy, Assertion};
pub use qname::QName;
