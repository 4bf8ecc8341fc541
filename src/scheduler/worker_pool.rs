//! Adaptive worker pool.
//!
//! This module provides a pool that executes submitted [`Job`]s on a fleet of
//! tokio workers whose size follows the queue depth. Each worker is an
//! independent async task pulling from one shared [`BoundedQueue`].
//!
//! # Features
//!
//! - Non-blocking submission with backpressure (`JobQueueFull`)
//! - Deadline-bounded submission that parks until a worker frees a slot
//! - Periodic reconciliation that sizes the fleet from the queue depth,
//!   clamped between the standby and maximum sizes
//! - Jam avoidance: one extra worker when no worker has made progress for
//!   `worker_jam` while jobs are waiting
//! - Idle expiry back down to the standby size
//! - Panic isolation: a panicking job is reported to the panic handler and
//!   retires only its own worker
//!
//! # Locking
//!
//! Worker count, last-progress instant, parked-caller count, and the active
//! settings live behind one `RwLock`. Scaling decisions take the read lock;
//! worker spawn/retire and counter updates take the write lock. The closed
//! flag is a separate atomic. No lock is ever held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::metrics::{JobOutcome, MetricsCollector, RejectReason};

use super::job::{Job, PanicHandler};
use super::queue::{deadline_after, wait_until, BoundedQueue, QueueError, Rejected};
use super::settings::{PoolSettings, SettingsError};
use super::worker::Worker;

/// Errors returned to callers submitting work to the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job queue is at capacity; slow down or grow the pool.
    #[error("Job queue is full")]
    JobQueueFull,

    /// The pool has been closed and accepts no more jobs.
    #[error("Worker pool is closed")]
    PoolClosed,

    /// Deadline-bounded submission ran out of time.
    #[error("Scheduling timed out after {0:?}")]
    ScheduleTimeout(Duration),

    /// Settings failed validation.
    #[error("Invalid pool settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// The pool was created outside of a tokio runtime.
    #[error("Worker pool must be created inside a tokio runtime")]
    NoRuntime,
}

/// Submission interface shared by pools and anything that fronts one.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Stops admitting jobs. Idempotent.
    fn close(&self);

    /// Returns whether the scheduler has been closed.
    fn is_closed(&self) -> bool;

    /// Enqueues a job without waiting.
    fn schedule(&self, job: Job) -> Result<(), PoolError>;

    /// Enqueues a job, waiting up to `timeout` for queue capacity.
    async fn schedule_with_timeout(&self, job: Job, timeout: Duration) -> Result<(), PoolError>;
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Number of live workers.
    pub worker_count: usize,
    /// Number of jobs waiting in the queue.
    pub queue_len: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Total number of jobs that ran to completion.
    pub jobs_completed: u64,
    /// Total number of jobs that panicked.
    pub jobs_panicked: u64,
    /// Total number of workers started.
    pub workers_spawned: u64,
    /// Total number of workers that ended.
    pub workers_retired: u64,
    /// Submissions rejected because the queue was full.
    pub rejected_full: u64,
    /// Submissions rejected because the pool was closed.
    pub rejected_closed: u64,
    /// Deadline-bounded submissions that timed out.
    pub schedule_timeouts: u64,
}

impl PoolStats {
    /// Returns the total number of jobs executed (completed + panicked).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_panicked
    }

    /// Returns the share of executed jobs that completed, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared counters backing [`PoolStats`].
#[derive(Default)]
pub(super) struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_panicked: AtomicU64,
    workers_spawned: AtomicU64,
    workers_retired: AtomicU64,
    rejected_full: AtomicU64,
    rejected_closed: AtomicU64,
    schedule_timeouts: AtomicU64,
}

impl SharedPoolStats {
    pub(super) fn record_job(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Panicked => &self.jobs_panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::QueueFull => &self.rejected_full,
            RejectReason::PoolClosed => &self.rejected_closed,
            RejectReason::Timeout => &self.schedule_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_pool_stats(
        &self,
        worker_count: usize,
        queue_len: usize,
        queue_capacity: usize,
    ) -> PoolStats {
        PoolStats {
            worker_count,
            queue_len,
            queue_capacity,
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
            schedule_timeouts: self.schedule_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Target fleet size computed by one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScalePlan {
    pub expected: usize,
    pub jam_bumped: bool,
}

/// Computes how many workers the pool should have.
///
/// `ceil(queue_len / batch)`, raised to the standby size, capped at the
/// maximum. When `jammed` and the fleet already meets that target, one more
/// worker is requested, still capped at the maximum. A `draining` pool (closed
/// with jobs still queued) ignores the standby size.
pub(crate) fn plan_workers(
    settings: &PoolSettings,
    queue_len: usize,
    worker_count: usize,
    jammed: bool,
    draining: bool,
) -> ScalePlan {
    let maximum = settings.worker_size_maximum;
    let cap = |n: usize| if maximum > 0 { n.min(maximum) } else { n };
    let floor = if draining {
        0
    } else {
        settings.worker_size_standby
    };

    let expected = cap(queue_len
        .div_ceil(settings.effective_batch_size())
        .max(floor));

    if jammed && worker_count >= expected {
        let bumped = cap(expected + 1);
        return ScalePlan {
            expected: bumped,
            jam_bumped: bumped > expected,
        };
    }

    ScalePlan {
        expected,
        jam_bumped: false,
    }
}

/// Mutable pool state guarded by a single lock.
pub(super) struct PoolState {
    pub(super) settings: PoolSettings,
    pub(super) worker_count: usize,
    pub(super) last_alive: Instant,
    pub(super) schedule_waiters: usize,
}

/// State shared between the pool handle, its workers, and the
/// reconciliation loop.
pub(super) struct PoolShared {
    pub(super) queue: BoundedQueue<Job>,
    state: RwLock<PoolState>,
    closed: AtomicBool,
    /// Coalesced "re-evaluate the fleet" request.
    spawn_pending: AtomicBool,
    /// Wakes the reconciliation loop on close.
    shutdown: Notify,
    /// Broadcast to callers parked in `schedule_with_timeout`.
    cycle: Notify,
    next_worker_id: AtomicU64,
    pub(super) stats: SharedPoolStats,
    pub(super) metrics: MetricsCollector,
}

impl PoolShared {
    pub(super) fn read_state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write_state(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn worker_expiry(&self) -> Duration {
        self.read_state().settings.worker_expiry
    }

    pub(super) fn panic_handler(&self) -> PanicHandler {
        Arc::clone(&self.read_state().settings.panic_handler)
    }

    fn signal_spawn(&self) {
        self.spawn_pending.store(true, Ordering::Release);
    }

    /// Start of a worker cycle: record progress and wake parked submitters.
    pub(super) fn begin_cycle(&self) {
        let waiters = {
            let mut state = self.write_state();
            state.last_alive = Instant::now();
            state.schedule_waiters
        };
        if waiters > 0 {
            self.cycle.notify_waiters();
        }
    }

    /// A slot just freed up in the queue.
    pub(super) fn job_dequeued(&self) {
        self.metrics.record_queue_delta(-1);
        if self.read_state().schedule_waiters > 0 {
            self.cycle.notify_waiters();
        }
    }

    fn reject(&self, reason: RejectReason) {
        self.stats.record_rejection(reason);
        self.metrics.record_rejection(reason);
    }

    /// One non-blocking submission attempt. Hands the job back on failure.
    ///
    /// A full queue is not counted here; callers that give up on it do so.
    fn try_schedule(&self, job: Job) -> Result<(), (PoolError, Job)> {
        if self.is_closed() {
            self.reject(RejectReason::PoolClosed);
            return Err((PoolError::PoolClosed, job));
        }

        match self.queue.offer(job) {
            Ok(()) => {
                self.metrics.record_queue_delta(1);
                self.signal_spawn();
                trace!(queue_len = self.queue.len(), "Job scheduled");
                Ok(())
            }
            Err(Rejected {
                error: QueueError::QueueFull,
                item,
            }) => {
                self.signal_spawn();
                Err((PoolError::JobQueueFull, item))
            }
            Err(Rejected { item, .. }) => {
                self.reject(RejectReason::PoolClosed);
                Err((PoolError::PoolClosed, item))
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let close_queue = self.read_state().settings.close_queue_on_close;
        if close_queue {
            self.queue.close();
        }

        self.shutdown.notify_one();
        self.cycle.notify_waiters();

        info!(
            pending_jobs = self.queue.len(),
            queue_closed = close_queue,
            "Worker pool closed"
        );
    }

    /// Reserves a worker slot unless the pool is at its maximum.
    pub(super) fn try_reserve_worker(&self) -> bool {
        let mut state = self.write_state();
        if state.settings.exceeds_maximum(state.worker_count + 1) {
            return false;
        }
        state.worker_count += 1;
        state.last_alive = Instant::now();
        drop(state);

        self.stats.workers_spawned.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_worker_spawned();
        true
    }

    /// Releases a worker slot when the pool has more workers than it needs.
    ///
    /// The check and the decrement happen under one write lock so that
    /// several idle workers cannot all retire past the standby size.
    pub(super) fn try_retire_surplus(&self) -> bool {
        let mut state = self.write_state();
        let surplus = state.worker_count > state.settings.worker_size_standby
            || state.settings.exceeds_maximum(state.worker_count);
        if !surplus && !self.is_closed() {
            return false;
        }
        state.worker_count = state.worker_count.saturating_sub(1);
        drop(state);

        self.record_retired();
        true
    }

    /// Releases a worker slot unconditionally and asks for a replacement.
    pub(super) fn release_worker(&self) {
        {
            let mut state = self.write_state();
            state.worker_count = state.worker_count.saturating_sub(1);
        }
        self.record_retired();
        self.signal_spawn();
    }

    fn record_retired(&self) {
        self.stats.workers_retired.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_worker_retired();
    }

    /// One reconciliation pass: spawn workers until the fleet matches the plan.
    fn reconcile(self: &Arc<Self>) {
        let queue_len = self.queue.len();
        let (plan, current) = {
            let state = self.read_state();
            let stalled = Instant::now().saturating_duration_since(state.last_alive)
                > state.settings.worker_jam;
            // Parked idle workers never refresh `last_alive`.
            let jammed = stalled && queue_len > 0;
            (
                plan_workers(
                    &state.settings,
                    queue_len,
                    state.worker_count,
                    jammed,
                    self.is_closed(),
                ),
                state.worker_count,
            )
        };

        if plan.jam_bumped {
            warn!(
                workers = current,
                queue_len,
                expected = plan.expected,
                "No worker progress within jam window; adding a worker"
            );
        }

        if current >= plan.expected {
            return;
        }

        let mut spawned = 0;
        for _ in current..plan.expected {
            if !self.spawn_worker() {
                break;
            }
            spawned += 1;
        }

        debug!(
            queue_len,
            before = current,
            expected = plan.expected,
            spawned,
            "Reconciled worker fleet"
        );
    }

    fn spawn_worker(self: &Arc<Self>) -> bool {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        match Worker::start(id, Arc::clone(self)) {
            Some(worker) => {
                tokio::spawn(worker.run());
                true
            }
            None => false,
        }
    }
}

/// Periodic reconciliation task.
///
/// Runs until the pool is closed and its queue is drained. After close every
/// tick reconciles, so jobs accepted before close still find a worker.
async fn run_reconciliation(shared: Arc<PoolShared>) {
    debug!("Reconciliation loop started");

    loop {
        let closed = shared.is_closed();
        if closed && shared.queue.is_empty() {
            break;
        }

        if shared.spawn_pending.swap(false, Ordering::AcqRel) || closed {
            shared.reconcile();
        }

        let interval = shared.read_state().settings.spawn_worker_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.shutdown.notified() => {}
        }
    }

    debug!("Reconciliation loop stopped");
}

/// Keeps a caller counted as parked for as long as it waits.
struct WaiterGuard<'a> {
    shared: &'a PoolShared,
}

impl<'a> WaiterGuard<'a> {
    fn register(shared: &'a PoolShared) -> Self {
        shared.write_state().schedule_waiters += 1;
        Self { shared }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.write_state();
        state.schedule_waiters = state.schedule_waiters.saturating_sub(1);
    }
}

/// Self-scaling pool of workers executing jobs from a bounded queue.
///
/// Dropping the pool closes it. Jobs already running are never interrupted.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates a pool and starts its reconciliation loop.
    ///
    /// The standby workers are spawned on the loop's first pass.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidSettings` if the settings fail validation,
    /// or `PoolError::NoRuntime` when called outside a tokio runtime.
    pub fn new(settings: PoolSettings) -> Result<Self, PoolError> {
        settings.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        info!(
            queue_capacity = settings.queue_capacity,
            standby = settings.worker_size_standby,
            maximum = settings.worker_size_maximum,
            batch_size = settings.worker_batch_size,
            "Worker pool started"
        );

        let shared = Arc::new(PoolShared {
            queue: BoundedQueue::new(settings.queue_capacity),
            state: RwLock::new(PoolState {
                settings,
                worker_count: 0,
                last_alive: Instant::now(),
                schedule_waiters: 0,
            }),
            closed: AtomicBool::new(false),
            spawn_pending: AtomicBool::new(true),
            shutdown: Notify::new(),
            cycle: Notify::new(),
            next_worker_id: AtomicU64::new(0),
            stats: SharedPoolStats::default(),
            metrics: MetricsCollector::new(),
        });

        runtime.spawn(run_reconciliation(Arc::clone(&shared)));

        Ok(Self { shared })
    }

    /// Creates a pool with default settings.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NoRuntime` when called outside a tokio runtime.
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(PoolSettings::default())
    }

    /// Enqueues a job without waiting.
    ///
    /// Whether or not the queue accepts the job, the reconciliation loop is
    /// asked to re-evaluate the fleet on its next tick.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolClosed` after [`close`](Self::close), or
    /// `PoolError::JobQueueFull` when the queue is at capacity.
    pub fn schedule(&self, job: Job) -> Result<(), PoolError> {
        self.shared.try_schedule(job).map_err(|(err, _)| {
            if matches!(err, PoolError::JobQueueFull) {
                self.shared.reject(RejectReason::QueueFull);
            }
            err
        })
    }

    /// Enqueues a job, retrying until it is accepted or `timeout` elapses.
    ///
    /// Between attempts the caller parks until a worker starts a new cycle
    /// or dequeues a job, bounded by the remaining time. The deadline is
    /// fixed on entry, so total waiting never exceeds `timeout`. A timeout
    /// too large to form a deadline waits until the job is accepted or the
    /// pool closes.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolClosed` if the pool is or becomes closed, or
    /// `PoolError::ScheduleTimeout` once the deadline passes.
    pub async fn schedule_with_timeout(&self, job: Job, timeout: Duration) -> Result<(), PoolError> {
        let shared = &*self.shared;
        let deadline = deadline_after(timeout);
        let _waiter = WaiterGuard::register(shared);
        let mut job = job;

        loop {
            let notified = shared.cycle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            job = match shared.try_schedule(job) {
                Ok(()) => return Ok(()),
                Err((PoolError::JobQueueFull, job)) => job,
                Err((err, _)) => return Err(err),
            };

            if !wait_until(notified, deadline).await {
                shared.reject(RejectReason::Timeout);
                return Err(PoolError::ScheduleTimeout(timeout));
            }
        }
    }

    /// Closes the pool. Idempotent.
    ///
    /// New submissions are rejected with `PoolClosed`. When
    /// `close_queue_on_close` is set the queue is closed too, and workers
    /// exit once it is drained; otherwise idle workers retire on expiry.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Replaces the pool settings.
    ///
    /// The new settings are validated and swapped in under the same lock as
    /// scaling decisions, then a reconciliation pass is requested. The queue
    /// capacity is fixed at construction and is kept as is.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidSettings` if the settings fail validation,
    /// or `PoolError::PoolClosed` if the pool is closed.
    pub fn reconfigure(&self, settings: PoolSettings) -> Result<(), PoolError> {
        settings.validate()?;
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let mut settings = settings;
        let capacity = self.shared.queue.capacity();
        if settings.queue_capacity != capacity {
            warn!(
                requested = settings.queue_capacity,
                capacity, "Queue capacity cannot change after construction"
            );
            settings.queue_capacity = capacity;
        }

        info!(
            standby = settings.worker_size_standby,
            maximum = settings.worker_size_maximum,
            batch_size = settings.worker_batch_size,
            "Worker pool reconfigured"
        );

        self.shared.write_state().settings = settings;
        self.shared.signal_spawn();
        Ok(())
    }

    /// Returns a copy of the active settings.
    pub fn settings(&self) -> PoolSettings {
        self.shared.read_state().settings.clone()
    }

    /// Returns the number of live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.read_state().worker_count
    }

    /// Returns the number of jobs waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let worker_count = self.worker_count();
        self.shared.stats.to_pool_stats(
            worker_count,
            self.shared.queue.len(),
            self.shared.queue.capacity(),
        )
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[async_trait]
impl JobScheduler for WorkerPool {
    fn close(&self) {
        WorkerPool::close(self);
    }

    fn is_closed(&self) -> bool {
        WorkerPool::is_closed(self)
    }

    fn schedule(&self, job: Job) -> Result<(), PoolError> {
        WorkerPool::schedule(self, job)
    }

    async fn schedule_with_timeout(&self, job: Job, timeout: Duration) -> Result<(), PoolError> {
        WorkerPool::schedule_with_timeout(self, job, timeout).await
    }
}
