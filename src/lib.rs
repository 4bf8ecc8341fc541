//! tidepool: an adaptive worker pool fed by a bounded job queue.
//!
//! Callers submit closures; a background reconciliation loop grows and
//! shrinks the set of workers draining the queue based on its depth and on
//! whether the workers are keeping up.

pub mod cli;
pub mod metrics;
pub mod scheduler;

pub use scheduler::{
    job, BoundedQueue, Invokable, Job, JobPanic, JobScheduler, PoolError, PoolSettings, PoolStats,
    QueueError, WorkerPool,
};
