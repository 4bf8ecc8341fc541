//! Pool worker task.
//!
//! A worker repeatedly takes a job from the shared queue and runs it. Each
//! cycle it records progress and wakes callers parked in
//! `schedule_with_timeout`. It ends when:
//!
//! - it stays idle for `worker_expiry` while the pool has surplus workers
//!   (or is closed),
//! - a job it runs panics, or
//! - the queue is closed and drained.
//!
//! The worker's slot in the pool's count is owned by a [`WorkerSlot`] and is
//! released exactly once, whichever way the task ends.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::metrics::JobOutcome;

use super::job::{Job, JobPanic};
use super::queue::QueueError;
use super::worker_pool::PoolShared;

/// Reservation of one unit of the pool's worker count.
struct WorkerSlot {
    shared: Arc<PoolShared>,
    released: bool,
}

impl WorkerSlot {
    fn reserve(shared: Arc<PoolShared>) -> Option<Self> {
        shared.try_reserve_worker().then_some(Self {
            shared,
            released: false,
        })
    }

    /// Gives the slot back if the pool has more workers than it needs.
    fn retire_if_surplus(&mut self) -> bool {
        if !self.released && self.shared.try_retire_surplus() {
            self.released = true;
        }
        self.released
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release_worker();
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Expired,
    Panicked,
    QueueClosed,
    Cancelled,
}

/// A single worker draining the pool's queue.
pub(super) struct Worker {
    id: u64,
    slot: WorkerSlot,
}

impl Worker {
    /// Reserves a slot for a new worker.
    ///
    /// Returns `None` when the pool is already at its maximum size.
    pub(super) fn start(id: u64, shared: Arc<PoolShared>) -> Option<Self> {
        let slot = WorkerSlot::reserve(shared)?;
        debug!(worker_id = id, "Worker started");
        Some(Self { id, slot })
    }

    /// Main worker loop.
    pub(super) async fn run(mut self) {
        let reason = loop {
            let shared = Arc::clone(&self.slot.shared);
            shared.begin_cycle();

            match shared.queue.take(Some(shared.worker_expiry())).await {
                Ok(job) => {
                    shared.job_dequeued();
                    if let Some(reason) = self.execute(job).await {
                        break reason;
                    }
                }
                Err(QueueError::TakeTimeout(_)) => {
                    if self.slot.retire_if_surplus() {
                        break ExitReason::Expired;
                    }
                }
                Err(_) => break ExitReason::QueueClosed,
            }
        };

        debug!(worker_id = self.id, reason = ?reason, "Worker stopped");
    }

    /// Runs one job on the blocking pool.
    ///
    /// Returns the exit reason when the worker must stop.
    async fn execute(&self, job: Job) -> Option<ExitReason> {
        let shared = &self.slot.shared;
        let started = Instant::now();
        trace!(worker_id = self.id, "Running job");

        let result = tokio::task::spawn_blocking(job).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                shared.stats.record_job(JobOutcome::Completed);
                shared.metrics.record_job(JobOutcome::Completed, elapsed);
                None
            }
            Err(err) if err.is_panic() => {
                shared.stats.record_job(JobOutcome::Panicked);
                shared.metrics.record_job(JobOutcome::Panicked, elapsed);

                let report = JobPanic::from_payload(self.id, err.into_panic());
                let handler = shared.panic_handler();
                handler(&report);
                Some(ExitReason::Panicked)
            }
            Err(err) => {
                warn!(worker_id = self.id, error = %err, "Job was cancelled");
                Some(ExitReason::Cancelled)
            }
        }
    }
}
