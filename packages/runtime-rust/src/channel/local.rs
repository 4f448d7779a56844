//! In-process loopback [`Transport`].
//!
//! [`LocalTransport::pair`] returns two connected ends. An exchange sent from
//! one end is delivered to the other with its role flipped, so each side sees
//! itself as consumer or provider of the same exchange. Answers to a
//! `send_sync` go straight back to the waiting caller instead of the inbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, Exchange, ExchangeId};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace};

use crate::traits::Transport;

struct Endpoint {
    name: String,
    inbox: mpsc::UnboundedSender<Exchange>,
    waiters: DashMap<ExchangeId, oneshot::Sender<Exchange>>,
}

impl Endpoint {
    fn deliver(&self, mut exchange: Exchange) -> BusResult<()> {
        exchange.set_role(exchange.role().peer());
        let exchange = match self.waiters.remove(exchange.id()) {
            Some((_, waiter)) => match waiter.send(exchange) {
                Ok(()) => return Ok(()),
                // The caller stopped waiting; fall back to the inbox.
                Err(exchange) => exchange,
            },
            None => exchange,
        };
        trace!(endpoint = %self.name, exchange = %exchange.id(), "delivered exchange");
        self.inbox.send(exchange).map_err(|_| {
            BusError::communication(format!("local endpoint {} is closed", self.name))
        })
    }
}

pub struct LocalTransport {
    local: Arc<Endpoint>,
    peer: Arc<Endpoint>,
    inbox: Mutex<mpsc::UnboundedReceiver<Exchange>>,
}

impl LocalTransport {
    /// Creates two connected ends named `a` and `b`.
    #[must_use]
    pub fn pair(a: &str, b: &str) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a_end = Arc::new(Endpoint {
            name: a.to_string(),
            inbox: a_tx,
            waiters: DashMap::new(),
        });
        let b_end = Arc::new(Endpoint {
            name: b.to_string(),
            inbox: b_tx,
            waiters: DashMap::new(),
        });
        (
            Arc::new(Self {
                local: Arc::clone(&a_end),
                peer: Arc::clone(&b_end),
                inbox: Mutex::new(a_rx),
            }),
            Arc::new(Self {
                local: b_end,
                peer: a_end,
                inbox: Mutex::new(b_rx),
            }),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.local.name
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn accept(&self, timeout: Duration) -> BusResult<Option<Exchange>> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(received) => Ok(received),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn send(&self, exchange: Exchange) -> BusResult<()> {
        self.peer.deliver(exchange)
    }

    async fn send_sync(
        &self,
        exchange: Exchange,
        timeout: Option<Duration>,
    ) -> BusResult<Option<Exchange>> {
        let id = exchange.id().clone();
        let (tx, rx) = oneshot::channel();
        self.local.waiters.insert(id.clone(), tx);

        if let Err(e) = self.peer.deliver(exchange) {
            self.local.waiters.remove(&id);
            return Err(e);
        }

        let answer = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(answer) => answer.ok(),
                Err(_elapsed) => None,
            },
            None => rx.await.ok(),
        };
        if answer.is_none() {
            self.local.waiters.remove(&id);
            debug!(endpoint = %self.local.name, exchange = %id, "synchronous send unanswered");
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{
        Content, ExchangePattern, ExchangeRole, NormalizedMessage, OperationDescription,
        Participant, QName, Transport as Via, IN, OUT,
    };

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::channel::testing::wait_until;
    use crate::channel::{ChannelListener, ChannelSender};
    use crate::config::{ListenerConfig, PoolConfig, SenderConfig};
    use crate::dispatch::{
        command_fn, CommandRegistry, CommandRequest, CommandResponse, ExchangeDispatcher,
    };
    use crate::invoke::{
        OperationCache, OperationProxy, ResilienceController, ServiceTarget, SingleTryController,
    };
    use crate::mapping::HeaderProjection;

    fn listening(
        end: Arc<LocalTransport>,
        sender: &Arc<ChannelSender>,
        catalog: &Arc<StaticCatalog>,
        commands: CommandRegistry,
    ) -> ChannelListener {
        let dispatcher = ExchangeDispatcher::new(
            Arc::clone(sender),
            catalog.clone(),
            Arc::new(HeaderProjection),
            catalog.clone(),
            catalog.clone(),
            Arc::new(commands),
        );
        ChannelListener::new(
            end,
            Arc::clone(sender),
            Arc::new(dispatcher),
            ListenerConfig {
                accept_timeout_ms: 20,
                idle_sleep_ms: 1,
                drain_timeout_ms: 1_000,
                pool: PoolConfig {
                    min_workers: 1,
                    max_workers: 4,
                    keep_alive_ms: 1_000,
                },
            },
        )
    }

    fn sender_on(end: &Arc<LocalTransport>) -> Arc<ChannelSender> {
        Arc::new(ChannelSender::new(
            end.clone(),
            Arc::new(HeaderProjection),
            SenderConfig::default(),
        ))
    }

    #[tokio::test]
    async fn delivers_with_flipped_role() {
        let (consumer, provider) = LocalTransport::pair("consumer", "provider");
        let exchange = Exchange::new(ExchangePattern::InOnly);
        let id = exchange.id().clone();
        consumer.send(exchange).await.unwrap();

        let received = provider
            .accept(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id(), &id);
        assert_eq!(received.role(), ExchangeRole::Provider);
    }

    #[tokio::test]
    async fn idle_accept_returns_none() {
        let (a, _b) = LocalTransport::pair("a", "b");
        assert!(a.accept(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn answer_reaches_sync_waiter_not_inbox() {
        let (consumer, provider) = LocalTransport::pair("consumer", "provider");
        let answering = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                let mut request = provider
                    .accept(Duration::from_secs(1))
                    .await
                    .unwrap()
                    .unwrap();
                request.properties.insert("answered".into(), "yes".into());
                provider.send(request).await.unwrap();
            })
        };

        let answer = consumer
            .send_sync(Exchange::new(ExchangePattern::InOut), Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        answering.await.unwrap();

        assert_eq!(answer.role(), ExchangeRole::Consumer);
        assert_eq!(answer.properties.get("answered").map(String::as_str), Some("yes"));
        assert!(consumer.accept(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loopback_invocation_end_to_end() {
        let service = QName::new("urn:acme", "Billing");
        let pay = QName::new("urn:acme", "pay");
        let catalog = Arc::new(StaticCatalog::new().with_operation(
            service.clone(),
            OperationDescription::new(pay.clone(), ExchangePattern::InOut),
        ));
        let commands = CommandRegistry::new().with(pay.clone(), |_, _| {
            command_fn(|mut req: CommandRequest| async move {
                let echoed = req
                    .exchange
                    .message(IN)
                    .map_or(Content::Unsupported("missing".into()), |m| m.content.clone());
                req.exchange.set_message(OUT, NormalizedMessage::new(echoed));
                Ok(CommandResponse::reply(req.exchange))
            })
        });

        let (consumer_end, provider_end) = LocalTransport::pair("consumer", "provider");
        let provider_sender = sender_on(&provider_end);
        let listener = listening(provider_end, &provider_sender, &catalog, commands);
        listener.start().unwrap();

        let proxy = OperationProxy::new(sender_on(&consumer_end), Arc::new(HeaderProjection));
        let controller =
            SingleTryController::new(catalog.clone(), catalog, OperationCache::new(), 2_000)
                .with_participant(Participant::new("acme-shop", Via::Local));

        let reply = proxy
            .invoke_in_out(
                &controller,
                &[ServiceTarget::service(service)],
                &pay,
                Content::Tree(serde_json::json!({"amount": 10})),
            )
            .await
            .unwrap();

        let echoed = match &reply.message.content {
            Content::Stream(bytes) => Content::stream_to_tree(bytes).unwrap(),
            other => panic!("unexpected reply content {other:?}"),
        };
        assert_eq!(echoed, serde_json::json!({"amount": 10}));
        assert_eq!(reply.context.operation.as_deref(), Some("pay"));

        // The consumer's completion reaches the provider and clears its journal.
        let id = ExchangeId(reply.context.exchange_id.clone().unwrap());
        wait_until(|| provider_sender.sent_participant(&id).is_none()).await;
        listener.stop().await;
    }

    #[tokio::test]
    async fn async_in_out_conversation_leaves_no_journal_entries() {
        let service = QName::new("urn:acme", "Billing");
        let pay = QName::new("urn:acme", "pay");
        let catalog = Arc::new(StaticCatalog::new().with_operation(
            service.clone(),
            OperationDescription::new(pay.clone(), ExchangePattern::InOut),
        ));
        let provider_commands = CommandRegistry::new().with(pay.clone(), |_, _| {
            command_fn(|mut req: CommandRequest| async move {
                req.exchange.set_message(
                    OUT,
                    NormalizedMessage::new(Content::Tree(serde_json::json!({"paid": true}))),
                );
                Ok(CommandResponse::reply(req.exchange))
            })
        });
        let answers = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&answers);
        let consumer_commands = CommandRegistry::new().with(pay.clone(), move |_, _| {
            let seen = Arc::clone(&seen);
            command_fn(move |req: CommandRequest| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(CommandResponse::complete(req.exchange))
                }
            })
        });

        let (consumer_end, provider_end) = LocalTransport::pair("consumer", "provider");
        let consumer_sender = sender_on(&consumer_end);
        let provider_sender = sender_on(&provider_end);
        let consumer = listening(consumer_end, &consumer_sender, &catalog, consumer_commands);
        let provider = listening(provider_end, &provider_sender, &catalog, provider_commands);
        consumer.start().unwrap();
        provider.start().unwrap();

        let controller =
            SingleTryController::new(catalog.clone(), catalog.clone(), OperationCache::new(), 0)
                .with_participant(Participant::new("shop", Via::Local));
        let mut exchange = controller
            .create_in_out_exchange(&[ServiceTarget::service(service)], &pay)
            .unwrap()
            .unwrap()
            .exchange;
        exchange.set_message(
            IN,
            NormalizedMessage::new(Content::Tree(serde_json::json!({"amount": 3}))),
        );
        let id = exchange.id().clone();
        consumer_sender.send(exchange).await.unwrap();
        assert_eq!(
            consumer_sender.sent_participant(&id).map(|p| p.unified_id),
            Some("shop".to_string())
        );

        wait_until(|| answers.load(std::sync::atomic::Ordering::SeqCst) == 1).await;
        wait_until(|| {
            consumer_sender.sent_participant(&id).is_none()
                && provider_sender.sent_participant(&id).is_none()
        })
        .await;

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn sync_send_times_out_without_answer() {
        let (consumer, _provider) = LocalTransport::pair("consumer", "provider");
        let answer = consumer
            .send_sync(Exchange::new(ExchangePattern::InOut), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(answer.is_none());
    }
}
