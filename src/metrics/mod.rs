//! Metrics module for Prometheus-based monitoring.
//!
//! Pools record worker lifecycle, queue depth, job outcomes, and rejected
//! submissions through [`MetricsCollector`]. Nothing is recorded until
//! [`init_metrics`] has been called.
//!
//! # Example
//!
//! ```ignore
//! use tidepool::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // ... run pools ...
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{JobOutcome, MetricsCollector, RejectReason};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    JOBS_TOTAL, QUEUE_DEPTH, REGISTRY, SCHEDULE_REJECTIONS, WORKERS, WORKERS_RETIRED,
    WORKERS_SPAWNED,
};
