//! Worker pool settings.
//!
//! This module provides the configuration value a [`WorkerPool`] is built
//! from: queue capacity, fleet sizing, reconciliation cadence, idle expiry,
//! jam detection, shutdown behavior, and the panic handler.
//!
//! Settings are an immutable value. Build one with the `with_*` setters or
//! [`PoolSettings::from_env`], and hand it to [`WorkerPool::new`] or
//! [`WorkerPool::reconfigure`]; both validate it first.
//!
//! [`WorkerPool`]: super::WorkerPool
//! [`WorkerPool::new`]: super::WorkerPool::new
//! [`WorkerPool::reconfigure`]: super::WorkerPool::reconfigure

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::job::{default_panic_handler, JobPanic, PanicHandler};

/// Errors that can occur while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Settings validation failed.
    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the worker pool.
#[derive(Clone)]
pub struct PoolSettings {
    /// Maximum number of jobs buffered in the queue.
    pub queue_capacity: usize,
    /// Desired number of queued jobs per worker. Zero is treated as one.
    pub worker_batch_size: usize,
    /// Workers kept alive even when there is no work.
    pub worker_size_standby: usize,
    /// Hard upper bound on concurrent workers. Zero means unbounded.
    pub worker_size_maximum: usize,
    /// Cadence of the reconciliation loop.
    pub spawn_worker_interval: Duration,
    /// Idle time after which a worker above standby size retires.
    pub worker_expiry: Duration,
    /// Time without worker progress after which the pool over-provisions by one.
    pub worker_jam: Duration,
    /// Whether closing the pool also closes the job queue.
    pub close_queue_on_close: bool,
    /// Invoked whenever a job panics.
    pub panic_handler: PanicHandler,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            worker_batch_size: 5,
            worker_size_standby: 5,
            worker_size_maximum: 1000,
            spawn_worker_interval: Duration::from_millis(100),
            worker_expiry: Duration::from_millis(5000),
            worker_jam: Duration::from_millis(1000),
            close_queue_on_close: true,
            panic_handler: default_panic_handler(),
        }
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("queue_capacity", &self.queue_capacity)
            .field("worker_batch_size", &self.worker_batch_size)
            .field("worker_size_standby", &self.worker_size_standby)
            .field("worker_size_maximum", &self.worker_size_maximum)
            .field("spawn_worker_interval", &self.spawn_worker_interval)
            .field("worker_expiry", &self.worker_expiry)
            .field("worker_jam", &self.worker_jam)
            .field("close_queue_on_close", &self.close_queue_on_close)
            .finish_non_exhaustive()
    }
}

impl PoolSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TIDEPOOL_QUEUE_CAPACITY`: Queue capacity (default: 1024)
    /// - `TIDEPOOL_BATCH_SIZE`: Jobs per worker (default: 5)
    /// - `TIDEPOOL_STANDBY`: Standby worker count (default: 5)
    /// - `TIDEPOOL_MAXIMUM`: Maximum worker count, 0 for unbounded (default: 1000)
    /// - `TIDEPOOL_SPAWN_INTERVAL_MS`: Reconciliation cadence (default: 100)
    /// - `TIDEPOOL_EXPIRY_MS`: Worker idle expiry (default: 5000)
    /// - `TIDEPOOL_JAM_MS`: Jam detection window (default: 1000)
    /// - `TIDEPOOL_CLOSE_QUEUE_ON_CLOSE`: Close the queue on pool close (default: true)
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a variable cannot be parsed or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Ok(val) = std::env::var("TIDEPOOL_QUEUE_CAPACITY") {
            settings.queue_capacity = parse_env_value(&val, "TIDEPOOL_QUEUE_CAPACITY")?;
        }

        if let Ok(val) = std::env::var("TIDEPOOL_BATCH_SIZE") {
            settings.worker_batch_size = parse_env_value(&val, "TIDEPOOL_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("TIDEPOOL_STANDBY") {
            settings.worker_size_standby = parse_env_value(&val, "TIDEPOOL_STANDBY")?;
        }

        if let Ok(val) = std::env::var("TIDEPOOL_MAXIMUM") {
            settings.worker_size_maximum = parse_env_value(&val, "TIDEPOOL_MAXIMUM")?;
        }

        if let Ok(val) = std::env::var("TIDEPOOL_SPAWN_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "TIDEPOOL_SPAWN_INTERVAL_MS")?;
            settings.spawn_worker_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("TIDEPOOL_EXPIRY_MS") {
            let ms: u64 = parse_env_value(&val, "TIDEPOOL_EXPIRY_MS")?;
            settings.worker_expiry = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("TIDEPOOL_JAM_MS") {
            let ms: u64 = parse_env_value(&val, "TIDEPOOL_JAM_MS")?;
            settings.worker_jam = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("TIDEPOOL_CLOSE_QUEUE_ON_CLOSE") {
            settings.close_queue_on_close = parse_env_bool(&val, "TIDEPOOL_CLOSE_QUEUE_ON_CLOSE")?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::ValidationFailed` if any value is invalid.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.queue_capacity == 0 {
            return Err(SettingsError::ValidationFailed(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.spawn_worker_interval.is_zero() {
            return Err(SettingsError::ValidationFailed(
                "spawn_worker_interval must be greater than 0".to_string(),
            ));
        }

        if self.worker_expiry.is_zero() {
            return Err(SettingsError::ValidationFailed(
                "worker_expiry must be greater than 0".to_string(),
            ));
        }

        if self.worker_size_maximum > 0 && self.worker_size_standby > self.worker_size_maximum {
            return Err(SettingsError::ValidationFailed(format!(
                "worker_size_standby ({}) must not exceed worker_size_maximum ({})",
                self.worker_size_standby, self.worker_size_maximum
            )));
        }

        Ok(())
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the desired jobs-per-worker ratio.
    pub fn with_worker_batch_size(mut self, batch_size: usize) -> Self {
        self.worker_batch_size = batch_size;
        self
    }

    /// Sets the standby worker count.
    pub fn with_worker_size_standby(mut self, standby: usize) -> Self {
        self.worker_size_standby = standby;
        self
    }

    /// Sets the maximum worker count (0 = unbounded).
    pub fn with_worker_size_maximum(mut self, maximum: usize) -> Self {
        self.worker_size_maximum = maximum;
        self
    }

    /// Sets the reconciliation loop cadence.
    pub fn with_spawn_worker_interval(mut self, interval: Duration) -> Self {
        self.spawn_worker_interval = interval;
        self
    }

    /// Sets the worker idle expiry.
    pub fn with_worker_expiry(mut self, expiry: Duration) -> Self {
        self.worker_expiry = expiry;
        self
    }

    /// Sets the jam detection window.
    pub fn with_worker_jam(mut self, jam: Duration) -> Self {
        self.worker_jam = jam;
        self
    }

    /// Sets whether closing the pool also closes the queue.
    pub fn with_close_queue_on_close(mut self, close: bool) -> Self {
        self.close_queue_on_close = close;
        self
    }

    /// Sets the panic handler.
    pub fn with_panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobPanic) + Send + Sync + 'static,
    {
        self.panic_handler = std::sync::Arc::new(handler);
        self
    }

    /// Batch size used for fleet sizing, floored at one.
    pub fn effective_batch_size(&self) -> usize {
        self.worker_batch_size.max(1)
    }

    /// Returns whether `count` workers would exceed the configured maximum.
    pub fn exceeds_maximum(&self, count: usize) -> bool {
        self.worker_size_maximum > 0 && count > self.worker_size_maximum
    }

    /// Returns a serializable view of these settings.
    pub fn summary(&self) -> SettingsSummary {
        SettingsSummary {
            queue_capacity: self.queue_capacity,
            worker_batch_size: self.worker_batch_size,
            worker_size_standby: self.worker_size_standby,
            worker_size_maximum: self.worker_size_maximum,
            spawn_worker_interval_ms: duration_millis(self.spawn_worker_interval),
            worker_expiry_ms: duration_millis(self.worker_expiry),
            worker_jam_ms: duration_millis(self.worker_jam),
            close_queue_on_close: self.close_queue_on_close,
        }
    }
}

/// Serializable view of [`PoolSettings`], durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsSummary {
    pub queue_capacity: usize,
    pub worker_batch_size: usize,
    pub worker_size_standby: usize,
    pub worker_size_maximum: usize,
    pub spawn_worker_interval_ms: u64,
    pub worker_expiry_ms: u64,
    pub worker_jam_ms: u64,
    pub close_queue_on_close: bool,
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, SettingsError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
