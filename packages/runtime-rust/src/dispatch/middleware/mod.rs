//! Tower middleware for the command pipeline.
//!
//! - [`metrics`]: command timing via `tracing` spans and the `metrics` histogram
//! - [`interceptor`]: policy-selected interceptors

pub mod interceptor;
pub mod metrics;

use std::sync::Arc;

use tower::util::BoxService;
use tower::ServiceBuilder;

pub use interceptor::InterceptorLayer;
pub use metrics::CommandMetricsLayer;

use crate::dispatch::command::{BoxCommand, Interceptor};

/// Wraps a command with the dispatch middleware.
///
/// Layer order (outermost to innermost):
/// 1. `CommandMetricsLayer`, so the recorded duration includes interceptors
/// 2. `InterceptorLayer`
#[must_use]
pub fn build_command_pipeline(
    command: BoxCommand,
    interceptors: Vec<Arc<dyn Interceptor>>,
) -> BoxCommand {
    BoxService::new(
        ServiceBuilder::new()
            .layer(CommandMetricsLayer)
            .layer(InterceptorLayer::new(interceptors))
            .service(command),
    )
}
