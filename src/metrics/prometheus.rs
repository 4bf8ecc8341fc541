//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by tidepool and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all tidepool metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of live workers across all pools.
pub static WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Number of jobs waiting in pool queues.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Total jobs executed, labeled by outcome (completed/panicked).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total rejected submissions, labeled by reason (full/closed/timeout).
pub static SCHEDULE_REJECTIONS: OnceLock<CounterVec> = OnceLock::new();

/// Total workers started by reconciliation.
pub static WORKERS_SPAWNED: OnceLock<Counter> = OnceLock::new();

/// Total workers that ended (expiry, panic, or shutdown).
pub static WORKERS_RETIRED: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup. Later calls are harmless: the metrics
/// stored by the first successful call stay in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let workers = Gauge::new("tidepool_workers", "Number of live workers")?;

    let queue_depth = Gauge::new("tidepool_queue_depth", "Number of jobs waiting in the queue")?;

    let jobs_total = CounterVec::new(
        Opts::new("tidepool_jobs_total", "Total jobs executed"),
        &["outcome"],
    )?;

    let schedule_rejections = CounterVec::new(
        Opts::new(
            "tidepool_schedule_rejections_total",
            "Total rejected job submissions",
        ),
        &["reason"],
    )?;

    let workers_spawned = Counter::new(
        "tidepool_workers_spawned_total",
        "Total workers started by reconciliation",
    )?;

    let workers_retired = Counter::new("tidepool_workers_retired_total", "Total workers ended")?;

    registry.register(Box::new(workers.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(schedule_rejections.clone()))?;
    registry.register(Box::new(workers_spawned.clone()))?;
    registry.register(Box::new(workers_retired.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = WORKERS.set(workers);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = SCHEDULE_REJECTIONS.set(schedule_rejections);
    let _ = WORKERS_SPAWNED.set(workers_spawned);
    let _ = WORKERS_RETIRED.set(workers_retired);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem instead.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_includes_pool_metrics() {
        let _ = init_metrics();
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&["completed"]).inc();
        }

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("tidepool_workers"));
        assert!(text.contains("tidepool_queue_depth"));
        assert!(text.contains("tidepool_jobs_total{outcome=\"completed\"}"));
    }
}
