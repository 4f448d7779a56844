//! Policy-selected interceptors around a command.
//!
//! For each request the layer keeps the interceptors whose
//! [`Interceptor::applies_to`] accepts the agreed policy of the call context.
//! Request hooks run in registration order, reply hooks in reverse order. An
//! exchange without a policy passes through untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::dispatch::command::{CommandFailure, CommandRequest, CommandResponse, Interceptor};

// ---------------------------------------------------------------------------
// InterceptorLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InterceptorLayer {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorLayer {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }
}

impl<S> Layer<S> for InterceptorLayer {
    type Service = InterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            inner: Arc::new(Mutex::new(inner)),
            interceptors: Arc::clone(&self.interceptors),
        }
    }
}

// ---------------------------------------------------------------------------
// InterceptorService
// ---------------------------------------------------------------------------

pub struct InterceptorService<S> {
    inner: Arc<Mutex<S>>,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl<S> Clone for InterceptorService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            interceptors: Arc::clone(&self.interceptors),
        }
    }
}

impl<S> Service<CommandRequest> for InterceptorService<S>
where
    S: Service<CommandRequest, Response = CommandResponse, Error = CommandFailure>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = CommandResponse;
    type Error = CommandFailure;
    type Future = Pin<Box<dyn Future<Output = Result<CommandResponse, CommandFailure>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner command is awaited in `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: CommandRequest) -> Self::Future {
        let selected: Vec<Arc<dyn Interceptor>> = match req.policy() {
            Some(policy) => self
                .interceptors
                .iter()
                .filter(|interceptor| interceptor.applies_to(policy))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            for interceptor in &selected {
                debug!(interceptor = interceptor.name(), "request interceptor");
                if let Err(e) = interceptor.on_request(&mut req).await {
                    return Err(req.fail(e));
                }
            }

            let fut = {
                let mut command = inner.lock().await;
                command.ready().await?.call(req)
            };
            let mut response = fut.await?;

            for interceptor in selected.iter().rev() {
                debug!(interceptor = interceptor.name(), "reply interceptor");
                if let Err(e) = interceptor.on_reply(&mut response).await {
                    return Err(response.fail(e));
                }
            }
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use conduit_core::{
        AgreedPolicy, Assertion, BusError, BusResult, CallContext, ErrorKind, Exchange,
        ExchangePattern, ExchangeRole, OperationDescription, QName,
    };
    use parking_lot::Mutex as SyncMutex;

    use super::*;
    use crate::dispatch::classify::classify;
    use crate::dispatch::command::command_fn;

    /// Appends `<name>:request` / `<name>:reply` to a shared journal.
    struct Journaling {
        name: &'static str,
        assertion: &'static str,
        journal: Arc<SyncMutex<Vec<String>>>,
        fail_request: bool,
    }

    #[async_trait]
    impl Interceptor for Journaling {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, policy: &AgreedPolicy) -> bool {
            policy.requires(self.assertion)
        }

        async fn on_request(&self, _request: &mut CommandRequest) -> BusResult<()> {
            self.journal.lock().push(format!("{}:request", self.name));
            if self.fail_request {
                return Err(BusError::illegal_input("credentials missing"));
            }
            Ok(())
        }

        async fn on_reply(&self, _response: &mut CommandResponse) -> BusResult<()> {
            self.journal.lock().push(format!("{}:reply", self.name));
            Ok(())
        }
    }

    fn request(policy: Option<AgreedPolicy>) -> CommandRequest {
        let mut exchange = Exchange::new(ExchangePattern::InOut);
        let mut ctx = CallContext::new("m", "c");
        ctx.policy = policy;
        exchange.attach_context(ctx).unwrap();
        CommandRequest {
            exchange,
            description: OperationDescription::new(
                QName::new("urn:acme", "pay"),
                ExchangePattern::InOut,
            ),
            classification: classify(ExchangeRole::Provider, false),
            started_at: 0,
        }
    }

    fn tracked_and_authenticated() -> AgreedPolicy {
        AgreedPolicy::new("p", QName::new("urn:acme", "Billing"))
            .with_assertion(Assertion::Tracking {
                level: "full".into(),
            })
            .with_assertion(Assertion::Authentication {
                mechanism: "basic".into(),
            })
    }

    fn layer(journal: &Arc<SyncMutex<Vec<String>>>, fail_auth: bool) -> InterceptorLayer {
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Journaling {
                name: "auth",
                assertion: "authentication",
                journal: Arc::clone(journal),
                fail_request: fail_auth,
            }),
            Arc::new(Journaling {
                name: "track",
                assertion: "tracking",
                journal: Arc::clone(journal),
                fail_request: false,
            }),
            Arc::new(Journaling {
                name: "crypt",
                assertion: "encryption",
                journal: Arc::clone(journal),
                fail_request: false,
            }),
        ];
        InterceptorLayer::new(interceptors)
    }

    fn echo() -> crate::dispatch::command::BoxCommand {
        command_fn(|req: CommandRequest| async move { Ok(CommandResponse::reply(req.exchange)) })
    }

    #[tokio::test]
    async fn runs_selected_interceptors_in_order() {
        let journal = Arc::new(SyncMutex::new(Vec::new()));
        let svc = layer(&journal, false).layer(echo());

        svc.oneshot(request(Some(tracked_and_authenticated())))
            .await
            .unwrap();

        assert_eq!(
            *journal.lock(),
            vec!["auth:request", "track:request", "track:reply", "auth:reply"]
        );
    }

    #[tokio::test]
    async fn no_policy_skips_interceptors() {
        let journal = Arc::new(SyncMutex::new(Vec::new()));
        let svc = layer(&journal, false).layer(echo());
        svc.oneshot(request(None)).await.unwrap();
        assert!(journal.lock().is_empty());
    }

    #[tokio::test]
    async fn failing_request_hook_short_circuits() {
        let journal = Arc::new(SyncMutex::new(Vec::new()));
        let svc = layer(&journal, true).layer(echo());

        let failure = svc
            .oneshot(request(Some(tracked_and_authenticated())))
            .await
            .unwrap_err();

        assert_eq!(failure.error.kind(), ErrorKind::IllegalInput);
        assert_eq!(*journal.lock(), vec!["auth:request"]);
    }
}
