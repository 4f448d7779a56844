//! Internal consumer invocations.
//!
//! - [`controller`]: the [`ResilienceController`] contract and attempt values
//! - [`single_try`]: the default one-attempt controller with its shared metadata cache
//! - [`proxy`]: the [`OperationProxy`] retry loop

pub mod controller;
pub mod proxy;
pub mod single_try;

pub use controller::{Attempt, ResilienceController, ServiceTarget};
pub use proxy::{InvocationReply, OperationProxy};
pub use single_try::{CachedOperation, OperationCache, SingleTryController};
