//! Listener lifecycle: run state, stop signal and in-flight dispatch tracking.
//!
//! State machine: `Created -> Running -> Stopping -> Stopped`, and
//! `Stopped -> Running` on restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    /// Polling has ended; in-flight dispatches are draining.
    Stopping,
    Stopped,
}

#[derive(Debug)]
pub struct ListenerLifecycle {
    state: ArcSwap<ListenerState>,
    stop_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
}

impl ListenerLifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(ListenerState::Created),
            stop_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        **self.state.load()
    }

    /// Atomically moves from one of `from` to `to`.
    ///
    /// Returns the previous state, or the current state if it was not in `from`.
    fn transition(
        &self,
        from: &[ListenerState],
        to: ListenerState,
    ) -> Result<ListenerState, ListenerState> {
        let mut current = self.state.load_full();
        loop {
            if !from.contains(&*current) {
                return Err(*current);
            }
            let previous = self.state.compare_and_swap(&current, Arc::new(to));
            if Arc::ptr_eq(&previous, &current) {
                return Ok(*current);
            }
            current = arc_swap::Guard::into_inner(previous);
        }
    }

    /// Enters `Running` from `Created` or `Stopped` and re-arms the stop signal.
    ///
    /// Returns the current state if the listener cannot start from it.
    pub fn mark_running(&self) -> Result<(), ListenerState> {
        self.transition(&[ListenerState::Created, ListenerState::Stopped], ListenerState::Running)?;
        self.stop_signal.send_replace(false);
        Ok(())
    }

    /// Enters `Stopping` and signals every stop receiver.
    ///
    /// Returns `false` if the listener was not running.
    pub fn begin_stop(&self) -> bool {
        if self
            .transition(&[ListenerState::Running], ListenerState::Stopping)
            .is_err()
        {
            return false;
        }
        self.stop_signal.send_replace(true);
        true
    }

    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(ListenerState::Stopped));
    }

    /// Receiver flipped to `true` when a stop begins.
    #[must_use]
    pub fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_signal.subscribe()
    }

    /// Counts one dispatch as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until no dispatch is in flight, up to `timeout`.
    ///
    /// Returns `false` if dispatches were still running at the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ListenerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
