//! Bounded worker pool for shard calls
//!
//! The pool caps how many shard calls run at once. Work is handed over with
//! [`WorkerPool::execute`], which never blocks the caller: the future is spawned
//! on the pool's runtime handle and waits there for one of `size` execution slots.
//! Queued and active work is tracked with atomics so [`WorkerPool::stats`] is
//! cheap enough to read on every query.
//!
//! # Lifecycle
//!
//! - Running: accepts work
//! - Stop requested: rejects new work, already accepted work runs to completion
//! - Stopped: stop requested and nothing left in flight

use crate::config::CoordinatorConfig;
use crate::error::MultiSearchError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Point-in-time counters of a worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub size: usize,
    /// Accepted work still waiting for a slot
    pub queued: usize,
    /// Work currently holding a slot
    pub active: usize,
    pub completed: u64,
    pub rejected: u64,
    pub stop_requested: bool,
}

impl PoolStats {
    /// Accepted but unfinished work relative to pool size
    ///
    /// Values above 1.0 mean work is queueing for slots.
    pub fn saturation(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        (self.queued + self.active) as f64 / self.size as f64
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// Moves a unit of work from queued to active and finally to completed
///
/// Counters stay balanced even if the future panics or is dropped mid-flight.
struct InFlightGuard {
    counters: Arc<PoolCounters>,
    active: bool,
}

impl InFlightGuard {
    fn queued(counters: Arc<PoolCounters>) -> Self {
        counters.queued.fetch_add(1, Ordering::SeqCst);
        Self {
            counters,
            active: false,
        }
    }

    fn activate(&mut self) {
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        self.counters.queued.fetch_sub(1, Ordering::SeqCst);
        self.active = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.active {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            self.counters.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Named pool of execution slots on a tokio runtime
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    handle: Handle,
    slots: Arc<Semaphore>,
    stop_requested: AtomicBool,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Create a pool on the current tokio runtime
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            MultiSearchError::config_error(
                "worker_threads",
                format!("no tokio runtime available: {}", e),
                "Create the worker pool from within a tokio runtime or use WorkerPool::with_handle",
            )
        })?;
        Self::with_handle(name, size, handle)
    }

    /// Create a pool that spawns onto the given runtime handle
    pub fn with_handle(name: impl Into<String>, size: usize, handle: Handle) -> Result<Self> {
        if size == 0 {
            return Err(MultiSearchError::config_error(
                "worker_threads",
                "must be greater than 0",
                "Use at least one worker per shard for full parallelism",
            ));
        }

        let name = name.into();
        debug!("Created worker pool '{}' with {} slots", name, size);

        Ok(Self {
            name,
            size,
            handle,
            slots: Arc::new(Semaphore::new(size)),
            stop_requested: AtomicBool::new(false),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Create a pool sized and named from coordinator configuration
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        Self::new(config.pool_name.clone(), config.worker_threads)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Hand a unit of work to the pool without waiting for it
    ///
    /// Fails with [`MultiSearchError::PoolStopped`] once a stop was requested.
    pub fn execute<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stop_requested.load(Ordering::SeqCst) {
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            warn!("Worker pool '{}' rejected work after stop was requested", self.name);
            return Err(MultiSearchError::PoolStopped {
                pool: self.name.clone(),
            });
        }

        let mut guard = InFlightGuard::queued(Arc::clone(&self.counters));
        let slots = Arc::clone(&self.slots);

        self.handle.spawn(async move {
            // The semaphore is never closed, acquisition only fails if it were
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            guard.activate();
            work.await;
            drop(guard);
        });

        Ok(())
    }

    /// Stop accepting new work; accepted work keeps running
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!(
                "Stop requested for worker pool '{}' with {} unit(s) in flight",
                self.name,
                self.in_flight()
            );
        }
    }

    /// Whether stop was requested and all accepted work has finished
    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst) && self.in_flight() == 0
    }

    /// Whether new work is still accepted
    pub fn is_accepting(&self) -> bool {
        !self.stop_requested.load(Ordering::SeqCst)
    }

    /// Accepted work that has not finished yet
    pub fn in_flight(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst) + self.counters.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            size: self.size,
            queued: self.counters.queued.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            stop_requested: self.stop_requested.load(Ordering::SeqCst),
        }
    }
}
