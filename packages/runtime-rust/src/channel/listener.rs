//! Inbound side of the channel.
//!
//! One polling task accepts exchanges from the transport and hands each one
//! to the worker pool. The poll loop never waits for a dispatch to finish and
//! never exits on an error: a failed poll is logged and followed by the idle
//! sleep like an empty one.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, Exchange, ExchangeStatus};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::lifecycle::{ListenerLifecycle, ListenerState};
use super::pool::{Job, WorkerPool};
use super::sender::ChannelSender;
use crate::config::ListenerConfig;
use crate::traits::Transport;

/// Processes one accepted exchange on a pool worker.
#[async_trait]
pub trait ExchangeHandler: Send + Sync {
    async fn handle(&self, exchange: Exchange);
}

struct Running {
    pool: WorkerPool,
    poller: JoinHandle<()>,
}

pub struct ChannelListener {
    transport: Arc<dyn Transport>,
    sender: Arc<ChannelSender>,
    handler: Arc<dyn ExchangeHandler>,
    config: ListenerConfig,
    lifecycle: Arc<ListenerLifecycle>,
    running: Mutex<Option<Running>>,
}

impl ChannelListener {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        sender: Arc<ChannelSender>,
        handler: Arc<dyn ExchangeHandler>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            transport,
            sender,
            handler,
            config,
            lifecycle: Arc::new(ListenerLifecycle::new()),
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.lifecycle.state()
    }

    /// Dispatches currently running on pool workers.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.lifecycle.in_flight_count()
    }

    /// Starts the worker pool and the polling task.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` for invalid pool bounds and
    /// `BusError::ProtocolViolation` if the listener is already running or
    /// still stopping.
    pub fn start(&self) -> BusResult<()> {
        self.config.pool.validate()?;
        self.lifecycle.mark_running().map_err(|state| {
            BusError::protocol_violation(format!("channel listener cannot start while {state:?}"))
        })?;

        let pool = WorkerPool::start(self.config.pool.clone());
        let poll_loop = PollLoop {
            transport: Arc::clone(&self.transport),
            sender: Arc::clone(&self.sender),
            handler: Arc::clone(&self.handler),
            pool: pool.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
            config: self.config.clone(),
        };
        let poller = tokio::spawn(poll_loop.run(self.lifecycle.stop_receiver()));
        *self.running.lock() = Some(Running { pool, poller });

        info!(
            max_workers = self.config.pool.max_workers,
            accept_timeout_ms = self.config.accept_timeout_ms,
            "channel listener started"
        );
        Ok(())
    }

    /// Stops polling, waits up to `drain_timeout` for in-flight dispatches,
    /// then shuts the pool down. A listener that is not running is left as is.
    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }

        let running = self.running.lock().take();
        if let Some(Running { pool, poller }) = running {
            if let Err(e) = poller.await {
                error!(error = %e, "polling task ended abnormally");
            }
            if !self
                .lifecycle
                .wait_for_drain(self.config.drain_timeout())
                .await
            {
                warn!(
                    in_flight = self.lifecycle.in_flight_count(),
                    "drain timeout reached with dispatches still running"
                );
            }
            pool.shutdown();
        }

        self.lifecycle.mark_stopped();
        info!("channel listener stopped");
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

struct PollLoop {
    transport: Arc<dyn Transport>,
    sender: Arc<ChannelSender>,
    handler: Arc<dyn ExchangeHandler>,
    pool: WorkerPool,
    lifecycle: Arc<ListenerLifecycle>,
    config: ListenerConfig,
}

impl PollLoop {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let accept_timeout = self.config.accept_timeout();
        let idle_sleep = self.config.idle_sleep();

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            let polled = tokio::select! {
                _ = stop.changed() => break,
                polled = self.transport.accept(accept_timeout) => polled,
            };

            match polled {
                Ok(Some(exchange)) => {
                    self.on_exchange(exchange).await;
                    continue;
                }
                Ok(None) => debug!("idle poll"),
                Err(e) => error!(error = %e, "transport accept failed"),
            }

            tokio::select! {
                _ = stop.changed() => break,
                () = tokio::time::sleep(idle_sleep) => {}
            }
        }
        debug!("polling task exited");
    }

    async fn on_exchange(&self, exchange: Exchange) {
        let id = exchange.id().clone();

        if exchange.status() == ExchangeStatus::Done {
            self.sender.acknowledge_completion(&exchange);
            return;
        }

        let missing = match (&exchange.operation, &exchange.service) {
            (None, _) => Some("operation"),
            (_, None) => Some("service"),
            _ => None,
        };
        if let Some(missing) = missing {
            let error = BusError::configuration(format!("exchange {id} names no {missing}"));
            if let Err(e) = self.sender.refuse_with_error(exchange, &error).await {
                error!(exchange = %id, error = %e, "failed to refuse incomplete exchange");
            }
            return;
        }

        debug!(exchange = %id, status = ?exchange.status(), "accepted exchange");
        metrics::counter!("conduit_exchanges_accepted").increment(1);

        let guard = self.lifecycle.in_flight_guard();
        let handler = Arc::clone(&self.handler);
        let job: Job = Box::pin(async move {
            let _guard = guard;
            handler.handle(exchange).await;
        });

        if let Err(rejected) = self.pool.try_submit(job) {
            warn!(exchange = %id, reason = %rejected, "exchange rejected, dropping it");
            metrics::counter!("conduit_exchanges_rejected").increment(1);
            self.sender.forget(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
