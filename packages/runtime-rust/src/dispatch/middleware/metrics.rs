//! Command timing: a tracing span per command plus the
//! `conduit_command_duration_ms` histogram.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::dispatch::command::{CommandFailure, CommandRequest, CommandResponse};

// ---------------------------------------------------------------------------
// CommandMetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMetricsLayer;

impl<S> Layer<S> for CommandMetricsLayer {
    type Service = CommandMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CommandMetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// CommandMetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandMetricsService<S> {
    inner: S,
}

impl<S> Service<CommandRequest> for CommandMetricsService<S>
where
    S: Service<CommandRequest, Response = CommandResponse, Error = CommandFailure> + Send,
    S::Future: Send + 'static,
{
    type Response = CommandResponse;
    type Error = CommandFailure;
    type Future = Pin<Box<dyn Future<Output = Result<CommandResponse, CommandFailure>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: CommandRequest) -> Self::Future {
        let operation = req.description.name.to_string();
        let state = req.classification.state.as_str();
        let span = info_span!(
            "command",
            exchange = %req.exchange.id(),
            operation = %operation,
            state,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::histogram!(
                    "conduit_command_duration_ms",
                    "operation" => operation,
                    "outcome" => outcome
                )
                .record(elapsed.as_secs_f64() * 1_000.0);

                tracing::debug!(duration_ms, outcome, "command complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conduit_core::{
        BusError, Exchange, ExchangePattern, ExchangeRole, OperationDescription, QName,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::classify::classify;
    use crate::dispatch::command::command_fn;

    fn request() -> CommandRequest {
        CommandRequest {
            exchange: Exchange::new(ExchangePattern::InOnly),
            description: OperationDescription::new(
                QName::new("urn:acme", "notify"),
                ExchangePattern::InOnly,
            ),
            classification: classify(ExchangeRole::Provider, false),
            started_at: 0,
        }
    }

    #[tokio::test]
    async fn passes_success_through() {
        let svc = CommandMetricsLayer.layer(command_fn(|req: CommandRequest| async move {
            Ok(CommandResponse::complete(req.exchange))
        }));
        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(
            response.disposition,
            crate::dispatch::command::Disposition::Complete
        );
    }

    #[tokio::test]
    async fn passes_failure_through() {
        let svc = CommandMetricsLayer.layer(command_fn(|req: CommandRequest| async move {
            Err(req.fail(BusError::infrastructure("backend down")))
        }));
        let failure = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(failure.error.kind(), conduit_core::ErrorKind::Infrastructure);
    }
}
