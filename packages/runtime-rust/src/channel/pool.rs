//! Bounded pool of async dispatch workers.
//!
//! Jobs are handed directly to an idle worker; there is no queue. When no
//! worker is idle a new one is spawned, up to `max_workers`. Beyond that the
//! job is handed back to the caller as [`PoolError::Saturated`].
//!
//! `min_workers` workers are started eagerly and never retire. Workers above
//! that bound retire after `keep_alive` without work.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use crate::config::PoolConfig;

/// A unit of work run by one worker.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A job the pool did not accept, handed back to the caller.
pub enum PoolError {
    /// Every worker is busy and the pool is at `max_workers`.
    Saturated(Job),
    ShutDown(Job),
}

impl PoolError {
    #[must_use]
    pub fn into_job(self) -> Job {
        match self {
            Self::Saturated(job) | Self::ShutDown(job) => job,
        }
    }
}

impl fmt::Debug for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saturated(_) => f.write_str("Saturated(..)"),
            Self::ShutDown(_) => f.write_str("ShutDown(..)"),
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saturated(_) => f.write_str("worker pool saturated"),
            Self::ShutDown(_) => f.write_str("worker pool shut down"),
        }
    }
}

impl std::error::Error for PoolError {}

struct PoolShared {
    config: PoolConfig,
    /// Hand-off slots parked by idle workers, most recently idle last.
    idle: Mutex<Vec<oneshot::Sender<Job>>>,
    live: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

impl PoolShared {
    /// Claims capacity for one more worker if the pool is below its cap.
    fn reserve_worker(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.config.max_workers).then_some(live + 1)
            })
            .is_ok()
    }
}

/// Cloneable handle to a running pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Starts the pool and its `min_workers` permanent workers.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(config: PoolConfig) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        let core = config.min_workers.min(config.max_workers);
        let pool = Self {
            shared: Arc::new(PoolShared {
                config,
                idle: Mutex::new(Vec::new()),
                live: AtomicUsize::new(0),
                shutdown,
            }),
        };
        for _ in 0..core {
            if pool.shared.reserve_worker() {
                tokio::spawn(worker_loop(Arc::clone(&pool.shared), None, true));
            }
        }
        debug!(core, max = pool.shared.config.max_workers, "worker pool started");
        pool
    }

    /// Hands `job` to an idle worker or a newly spawned one.
    ///
    /// # Errors
    ///
    /// Returns the job inside [`PoolError`] if the pool is saturated or shut down.
    pub fn try_submit(&self, job: Job) -> Result<(), PoolError> {
        if *self.shared.shutdown.borrow() {
            return Err(PoolError::ShutDown(job));
        }

        let mut job = job;
        loop {
            let slot = self.shared.idle.lock().pop();
            let Some(slot) = slot else { break };
            match slot.send(job) {
                Ok(()) => return Ok(()),
                // The worker retired after parking its slot.
                Err(returned) => job = returned,
            }
        }

        if self.shared.reserve_worker() {
            tokio::spawn(worker_loop(Arc::clone(&self.shared), Some(job), false));
            return Ok(());
        }
        Err(PoolError::Saturated(job))
    }

    /// Stops accepting jobs and wakes idle workers so they exit.
    ///
    /// Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        self.shared.idle.lock().clear();
    }

    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Workers currently parked waiting for a job.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared
            .idle
            .lock()
            .iter()
            .filter(|slot| !slot.is_closed())
            .count()
    }
}

async fn run_job(job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(%reason, "dispatch job panicked");
    }
}

async fn worker_loop(shared: Arc<PoolShared>, first: Option<Job>, core: bool) {
    let mut shutdown = shared.shutdown.subscribe();
    let keep_alive = shared.config.keep_alive();

    if let Some(job) = first {
        run_job(job).await;
    }

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let (slot, mut hand_off) = oneshot::channel::<Job>();
        shared.idle.lock().push(slot);

        let job = tokio::select! {
            received = &mut hand_off => received.ok(),
            _ = shutdown.changed() => None,
            () = tokio::time::sleep(keep_alive), if !core => None,
        };

        let job = match job {
            Some(job) => Some(job),
            None => {
                // A job may have been handed off while we were leaving.
                hand_off.close();
                hand_off.try_recv().ok()
            }
        };

        match job {
            Some(job) => run_job(job).await,
            None if *shutdown.borrow() => break,
            None if !core => {
                debug!("idle worker retired");
                break;
            }
            None => {}
        }
    }

    shared.live.fetch_sub(1, Ordering::AcqRel);
    shared.idle.lock().retain(|slot| !slot.is_closed());
}
