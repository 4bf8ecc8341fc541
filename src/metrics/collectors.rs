//! Metric recording facade for the worker pool.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics. Every method is a
//! no-op until [`init_metrics`](super::init_metrics) has run, so pools can
//! record unconditionally.

use super::prometheus::{
    JOBS_TOTAL, QUEUE_DEPTH, SCHEDULE_REJECTIONS, WORKERS, WORKERS_RETIRED, WORKERS_SPAWNED,
};

/// Outcome label for executed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Panicked,
}

impl JobOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Panicked => "panicked",
        }
    }
}

/// Reason label for rejected submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    PoolClosed,
    Timeout,
}

impl RejectReason {
    fn as_label(self) -> &'static str {
        match self {
            Self::QueueFull => "full",
            Self::PoolClosed => "closed",
            Self::Timeout => "timeout",
        }
    }
}

/// Metrics collector for recording pool operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a worker start.
    pub fn record_worker_spawned(&self) {
        if let Some(spawned) = WORKERS_SPAWNED.get() {
            spawned.inc();
        }
        if let Some(workers) = WORKERS.get() {
            workers.inc();
        }
    }

    /// Record a worker ending.
    pub fn record_worker_retired(&self) {
        if let Some(retired) = WORKERS_RETIRED.get() {
            retired.inc();
        }
        if let Some(workers) = WORKERS.get() {
            workers.dec();
        }
    }

    /// Record an executed job.
    pub fn record_job(&self, outcome: JobOutcome, duration_secs: f64) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[outcome.as_label()]).inc();
        }

        tracing::trace!(
            outcome = outcome.as_label(),
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record a rejected submission.
    pub fn record_rejection(&self, reason: RejectReason) {
        if let Some(rejections) = SCHEDULE_REJECTIONS.get() {
            rejections.with_label_values(&[reason.as_label()]).inc();
        }
    }

    /// Record a change in queue depth.
    ///
    /// `delta` is +1 for an accepted job and -1 for a dequeued one, so
    /// several pools can share the gauge.
    pub fn record_queue_delta(&self, delta: i8) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            depth.add(f64::from(delta));
        }
    }
}
