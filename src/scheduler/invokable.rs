//! Typed submission facade.
//!
//! An [`Invokable`] binds a handler to a scheduler so callers can submit a
//! payload instead of building a closure each time. It holds no state of its
//! own beyond the handler and the scheduler handle.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::worker_pool::{JobScheduler, PoolError, WorkerPool};

/// A handler bound to a scheduler.
pub struct Invokable<T, S = WorkerPool>
where
    S: JobScheduler + ?Sized,
{
    scheduler: Arc<S>,
    callee: Arc<dyn Fn(T) + Send + Sync>,
    _payload: PhantomData<fn(T)>,
}

impl<T, S> Invokable<T, S>
where
    T: Send + 'static,
    S: JobScheduler + ?Sized,
{
    /// Binds `callee` to `scheduler`.
    pub fn new<F>(scheduler: Arc<S>, callee: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            scheduler,
            callee: Arc::new(callee),
            _payload: PhantomData,
        }
    }

    /// Schedules `callee(value)` and ignores the outcome.
    ///
    /// Use [`JobScheduler::schedule`] directly when rejections matter.
    pub fn invoke(&self, value: T) {
        if let Err(e) = self.scheduler.schedule(self.bind(value)) {
            debug!(error = %e, "Fire-and-forget invocation dropped");
        }
    }

    /// Schedules `callee(value)`, waiting up to `timeout` for capacity.
    ///
    /// # Errors
    ///
    /// Returns whatever [`JobScheduler::schedule_with_timeout`] returns.
    pub async fn invoke_with_timeout(&self, value: T, timeout: Duration) -> Result<(), PoolError> {
        self.scheduler
            .schedule_with_timeout(self.bind(value), timeout)
            .await
    }

    /// Returns the scheduler this invokable submits to.
    pub fn scheduler(&self) -> &Arc<S> {
        &self.scheduler
    }

    fn bind(&self, value: T) -> super::job::Job {
        let callee = Arc::clone(&self.callee);
        Box::new(move || callee(value))
    }
}

impl<T, S> Clone for Invokable<T, S>
where
    S: JobScheduler + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            callee: Arc::clone(&self.callee),
            _payload: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Job;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Runs jobs inline and records the timeouts it was given.
    #[derive(Default)]
    struct InlineScheduler {
        closed: AtomicBool,
        timeouts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl JobScheduler for InlineScheduler {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn schedule(&self, job: Job) -> Result<(), PoolError> {
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }
            job();
            Ok(())
        }

        async fn schedule_with_timeout(&self, job: Job, timeout: Duration) -> Result<(), PoolError> {
            self.timeouts.lock().expect("timeouts lock").push(timeout);
            self.schedule(job)
        }
    }

    fn recording() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| sink.lock().expect("seen lock").push(value))
    }

    #[test]
    fn test_invoke_passes_payload_to_callee() {
        let scheduler = Arc::new(InlineScheduler::default());
        let (seen, callee) = recording();
        let invokable = Invokable::new(Arc::clone(&scheduler), callee);

        invokable.invoke(1);
        invokable.clone().invoke(2);

        assert_eq!(*seen.lock().expect("seen lock"), vec![1, 2]);
    }

    #[test]
    fn test_invoke_swallows_rejection() {
        let scheduler = Arc::new(InlineScheduler::default());
        scheduler.close();
        let (seen, callee) = recording();
        let invokable = Invokable::new(scheduler, callee);

        invokable.invoke(9);

        assert!(seen.lock().expect("seen lock").is_empty());
    }

    #[tokio::test]
    async fn test_invoke_with_timeout_forwards_timeout_and_error() {
        let scheduler = Arc::new(InlineScheduler::default());
        let (seen, callee) = recording();
        let invokable = Invokable::new(Arc::clone(&scheduler), callee);

        invokable
            .invoke_with_timeout(4, Duration::from_millis(75))
            .await
            .expect("inline scheduler accepts");
        scheduler.close();
        let err = invokable
            .invoke_with_timeout(5, Duration::from_millis(10))
            .await
            .expect_err("closed scheduler rejects");

        assert!(matches!(err, PoolError::PoolClosed));
        assert_eq!(*seen.lock().expect("seen lock"), vec![4]);
        assert_eq!(
            *scheduler.timeouts.lock().expect("timeouts lock"),
            vec![Duration::from_millis(75), Duration::from_millis(10)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invokable_over_worker_pool() {
        let pool = Arc::new(
            WorkerPool::new(
                crate::scheduler::PoolSettings::new()
                    .with_worker_size_standby(1)
                    .with_spawn_worker_interval(Duration::from_millis(10)),
            )
            .expect("pool"),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let invokable = Invokable::new(pool, move |value: String| {
            let _ = tx.send(value.to_uppercase());
        });

        invokable
            .invoke_with_timeout("hello".to_string(), Duration::from_secs(1))
            .await
            .expect("pool accepts");

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("job should run");
        assert_eq!(received.as_deref(), Some("HELLO"));
    }
}
