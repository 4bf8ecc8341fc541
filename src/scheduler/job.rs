//! Job definitions for the scheduler.
//!
//! This module defines the unit of work the pool executes and the report
//! produced when one of them panics:
//!
//! - `Job`: a boxed zero-argument closure
//! - `JobPanic`: what the panic handler receives when a job panics
//! - `PanicHandler`: the configurable fault hook

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A unit of work: a zero-argument closure with no return value.
///
/// Ownership moves into the queue on submission and into the executing
/// worker on dequeue, so each job runs at most once.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handler invoked with the details of a panicking job.
pub type PanicHandler = Arc<dyn Fn(&JobPanic) + Send + Sync>;

/// Boxes a closure into a [`Job`].
pub fn job<F>(f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::new(f)
}

/// Report of a job that panicked while a worker was running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic {
    /// Internal id of the worker that ran the job.
    pub worker_id: u64,
    /// Panic message, when the payload was a string.
    pub message: String,
}

impl JobPanic {
    /// Builds a report from a raw panic payload.
    pub fn from_payload(worker_id: u64, payload: Box<dyn Any + Send>) -> Self {
        Self {
            worker_id,
            message: panic_message(payload.as_ref()),
        }
    }
}

impl fmt::Display for JobPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job panicked on worker {}: {}", self.worker_id, self.message)
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The default panic handler: log and keep going.
///
/// The process panic hook has already reported the location (and the
/// backtrace, with `RUST_BACKTRACE` set) by the time this runs.
pub fn default_panic_handler() -> PanicHandler {
    Arc::new(|panic: &JobPanic| {
        tracing::error!(
            worker_id = panic.worker_id,
            panic = %panic.message,
            "Job panicked; worker retiring"
        );
    })
}
