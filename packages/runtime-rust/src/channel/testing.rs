//! Scripted transport for channel tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, Exchange};
use parking_lot::Mutex;

use crate::traits::Transport;

type Answer = Box<dyn Fn(Exchange) -> Option<Exchange> + Send + Sync>;

/// Records every outbound exchange and replays queued inbound ones.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Exchange>>,
    inbound: Mutex<VecDeque<BusResult<Exchange>>>,
    answer: Mutex<Option<Answer>>,
    accepts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, exchange: Exchange) {
        self.inbound.lock().push_back(Ok(exchange));
    }

    pub fn push_accept_error(&self, error: BusError) {
        self.inbound.lock().push_back(Err(error));
    }

    /// Answers `send_sync` calls with `answer`; unanswered by default.
    pub fn answer_with(&self, answer: impl Fn(Exchange) -> Option<Exchange> + Send + Sync + 'static) {
        *self.answer.lock() = Some(Box::new(answer));
    }

    pub fn sent(&self) -> Vec<Exchange> {
        self.sent.lock().clone()
    }

    pub fn accept_calls(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.lock().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn accept(&self, timeout: Duration) -> BusResult<Option<Exchange>> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        let next = self.inbound.lock().pop_front();
        match next {
            Some(result) => result.map(Some),
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
                Ok(None)
            }
        }
    }

    async fn send(&self, exchange: Exchange) -> BusResult<()> {
        self.sent.lock().push(exchange);
        Ok(())
    }

    async fn send_sync(
        &self,
        exchange: Exchange,
        _timeout: Option<Duration>,
    ) -> BusResult<Option<Exchange>> {
        self.sent.lock().push(exchange.clone());
        let answer = self.answer.lock();
        Ok(answer.as_ref().and_then(|answer| answer(exchange)))
    }
}

/// Polls `check` until it holds, failing the test after about a second.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
