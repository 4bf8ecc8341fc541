//! Adaptive worker pool with a bounded job queue.
//!
//! This module provides in-process job execution with backpressure:
//!
//! - **BoundedQueue**: fixed-capacity FIFO with blocking, non-blocking, and
//!   deadline-bounded put/take
//! - **WorkerPool**: self-scaling fleet of tokio workers draining the queue
//! - **Invokable**: typed handler bound to a scheduler
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Callers    │
//!                      └──────┬───────┘
//!                             │ schedule / schedule_with_timeout
//!                      ┌──────▼───────┐        ┌────────────────┐
//!                      │ BoundedQueue │◄───────┤ Reconciliation │
//!                      └──────┬───────┘ depth  │      loop      │
//!                             │                └───────┬────────┘
//!         ┌───────────────────┼───────────────────┐    │ spawn
//!         ▼                   ▼                   ▼    │
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tidepool::scheduler::{job, PoolSettings, WorkerPool};
//! use std::time::Duration;
//!
//! let pool = WorkerPool::new(
//!     PoolSettings::new()
//!         .with_queue_capacity(256)
//!         .with_worker_size_standby(2)
//!         .with_worker_size_maximum(16),
//! )?;
//!
//! pool.schedule(job(|| println!("hello from a worker")))?;
//! pool.schedule_with_timeout(job(|| {}), Duration::from_millis(500)).await?;
//!
//! pool.close();
//! ```
//!
//! # Backpressure
//!
//! `JobQueueFull` and `ScheduleTimeout` mean the pool cannot keep up. Callers
//! should slow down or give the pool more capacity; neither is fatal.

pub mod invokable;
pub mod job;
pub mod queue;
pub mod settings;
mod worker;
pub mod worker_pool;

pub use invokable::Invokable;
pub use job::{default_panic_handler, job, Job, JobPanic, PanicHandler};
pub use queue::{BoundedQueue, QueueError, Rejected};
pub use settings::{PoolSettings, SettingsError, SettingsSummary};
pub use worker_pool::{JobScheduler, PoolError, PoolStats, WorkerPool};
