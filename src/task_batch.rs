//! Batches of shard tasks with a bounded wait
//!
//! A [`TaskBatch`] tracks one task per shard for a single query. Tasks run on a
//! [`WorkerPool`]; the coordinator waits with [`TaskBatch::wait_for`] until every
//! task reached a terminal state or the timeout elapsed, then takes exactly one
//! [`TaskBatch::snapshot`]. The snapshot closes the batch: results that arrive
//! afterwards are discarded and never change what the caller already saw.
//!
//! # Task states
//!
//! `Pending -> Running -> Succeeded | Failed`
//!
//! A task that panics is recorded as failed. A task still pending or running when
//! the snapshot is taken is reported as [`TaskOutcome::Unfinished`].

use crate::error::MultiSearchError;
use crate::identifiers::ShardId;
use crate::worker_pool::WorkerPool;
use crate::Result;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle state of one task in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Outcome of a task as seen by the snapshot
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(MultiSearchError),
    /// Still pending or running when the snapshot was taken
    Unfinished,
}

/// One task's entry in a snapshot
#[derive(Debug)]
pub struct TaskReport<T> {
    pub shard: ShardId,
    pub outcome: TaskOutcome<T>,
}

/// Frozen view of a batch, in submission order
#[derive(Debug)]
pub struct BatchSnapshot<T> {
    pub reports: Vec<TaskReport<T>>,
    /// Time from batch creation to snapshot
    pub elapsed: Duration,
}

impl<T> BatchSnapshot<T> {
    pub fn unfinished(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Unfinished))
            .count()
    }
}

struct Slot<T> {
    shard: ShardId,
    state: TaskState,
    outcome: Option<Result<T>>,
}

struct BatchState<T> {
    slots: Vec<Slot<T>>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<BatchState<T>>,
    remaining: AtomicUsize,
    finished: Notify,
    cancel: CancellationToken,
}

impl<T> Shared<T> {
    fn mark_running(&self, index: usize) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Some(slot) = state.slots.get_mut(index) {
            slot.state = TaskState::Running;
        }
    }

    fn complete(&self, index: usize, outcome: Result<T>) {
        {
            let mut state = self.state.lock();
            if state.closed {
                let shard = state.slots.get(index).map(|s| s.shard);
                debug!(
                    "Discarding late {} from shard {:?}: batch already snapshotted",
                    if outcome.is_ok() { "result" } else { "failure" },
                    shard
                );
            } else if let Some(slot) = state.slots.get_mut(index) {
                slot.state = if outcome.is_ok() {
                    TaskState::Succeeded
                } else {
                    TaskState::Failed
                };
                slot.outcome = Some(outcome);
            }
        }

        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.finished.notify_waiters();
        }
    }
}

/// Tasks of one fan-out query
pub struct TaskBatch<T> {
    shared: Arc<Shared<T>>,
    created: Instant,
}

impl<T: Send + 'static> TaskBatch<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BatchState {
                    slots: Vec::new(),
                    closed: false,
                }),
                remaining: AtomicUsize::new(0),
                finished: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            created: Instant::now(),
        }
    }

    /// Submit one task for a shard
    ///
    /// The task receives a cancellation token that fires when the batch is
    /// abandoned. If the pool rejects the task it is recorded as failed right away
    /// and the rejection is returned.
    pub fn submit<F, Fut>(&self, pool: &WorkerPool, shard: ShardId, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let index = {
            let mut state = self.shared.state.lock();
            state.slots.push(Slot {
                shard,
                state: TaskState::Pending,
                outcome: None,
            });
            state.slots.len() - 1
        };
        self.shared.remaining.fetch_add(1, Ordering::SeqCst);

        let future = task(self.shared.cancel.child_token());
        let shared = Arc::clone(&self.shared);

        let submitted = pool.execute(async move {
            shared.mark_running(index);
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!("Task for shard {} panicked: {}", shard, reason);
                    Err(MultiSearchError::TaskFailed { shard, reason })
                }
            };
            shared.complete(index, outcome);
        });

        if let Err(error) = submitted {
            self.shared.complete(index, Err(error));
            return Err(MultiSearchError::PoolStopped {
                pool: pool.name().to_string(),
            });
        }

        Ok(())
    }

    /// Submit one task per shard, continuing past rejected submissions
    ///
    /// Returns how many tasks the pool accepted.
    pub fn submit_all<I, F, Fut>(&self, pool: &WorkerPool, tasks: I) -> usize
    where
        I: IntoIterator<Item = (ShardId, F)>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut accepted = 0;
        for (shard, task) in tasks {
            match self.submit(pool, shard, task) {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Could not submit task for shard {}: {}", shard, e),
            }
        }
        accepted
    }

    /// Wait until every task is terminal or the timeout elapses
    ///
    /// Returns `true` if every task finished in time.
    pub async fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.remaining.load(Ordering::SeqCst) == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.shared.remaining.load(Ordering::SeqCst) == 0;
            }
        }
    }

    /// Freeze the batch and move out every terminal outcome
    ///
    /// Only the first snapshot carries results; later calls report every task as
    /// unfinished because the outcomes were already handed out.
    pub fn snapshot(&self) -> BatchSnapshot<T> {
        let mut state = self.shared.state.lock();
        state.closed = true;

        let unfinished = state.slots.iter().filter(|slot| !slot.state.is_terminal()).count();
        if unfinished > 0 {
            debug!("Snapshot taken with {} of {} task(s) unfinished", unfinished, state.slots.len());
        }

        let reports = state
            .slots
            .iter_mut()
            .map(|slot| TaskReport {
                shard: slot.shard,
                outcome: match slot.outcome.take() {
                    Some(Ok(value)) => TaskOutcome::Succeeded(value),
                    Some(Err(error)) => TaskOutcome::Failed(error),
                    None => TaskOutcome::Unfinished,
                },
            })
            .collect();

        BatchSnapshot {
            reports,
            elapsed: self.created.elapsed(),
        }
    }

    /// Signal every task still in flight to stop
    pub fn abandon(&self) {
        let in_flight = self.remaining();
        if in_flight > 0 {
            debug!("Abandoning {} unfinished task(s)", in_flight);
        }
        self.shared.cancel.cancel();
    }

    /// Tasks not yet in a terminal state
    pub fn remaining(&self) -> usize {
        self.shared.remaining.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Current state of every task, in submission order
    pub fn states(&self) -> Vec<TaskState> {
        self.shared.state.lock().slots.iter().map(|s| s.state).collect()
    }
}

impl<T: Send + 'static> Default for TaskBatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
