//! Bounded in-memory FIFO queue.
//!
//! This module provides the fixed-capacity buffer that sits between job
//! producers and the worker fleet. It supports:
//!
//! - Non-blocking `offer`/`poll` for callers that must never wait
//! - Async `put`/`take` that park until a slot or an item is available,
//!   optionally bounded by a timeout
//! - One-way `close`: producers are rejected afterwards while consumers can
//!   still drain whatever is left
//!
//! # Wake-ups
//!
//! Parked producers and consumers are woken through two `tokio::sync::Notify`
//! instances (`not_full`, `not_empty`). Every waiter registers interest
//! *before* re-checking the buffer, so a push or pop that races with the
//! check is never missed.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Errors that can occur during queue operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity (for non-blocking operations).
    #[error("Queue is full")]
    QueueFull,

    /// The queue is empty (for non-blocking operations).
    #[error("Queue is empty")]
    QueueEmpty,

    /// No slot freed up before the put deadline.
    #[error("Put timed out after {0:?}")]
    PutTimeout(Duration),

    /// No item arrived before the take deadline.
    #[error("Take timed out after {0:?}")]
    TakeTimeout(Duration),

    /// The queue was closed and accepts no more items.
    #[error("Queue is closed")]
    Closed,
}

/// An item the queue refused, handed back with the reason.
///
/// Producers get ownership of the item back so a failed enqueue never
/// loses work.
pub struct Rejected<T> {
    /// Why the item was refused.
    pub error: QueueError,
    /// The refused item.
    pub item: T,
}

impl<T> Rejected<T> {
    /// Returns the refused item, discarding the reason.
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl<T> std::error::Error for Rejected<T> {}

/// Fixed-capacity FIFO queue shared between producers and consumers.
pub struct BoundedQueue<T> {
    /// Buffered items, oldest first.
    items: Mutex<VecDeque<T>>,
    /// Maximum number of buffered items.
    capacity: usize,
    /// One-way closed flag. Only flipped while `items` is locked.
    closed: AtomicBool,
    /// Signalled whenever an item is pushed (or the queue closes).
    not_empty: Notify,
    /// Signalled whenever an item is popped (or the queue closes).
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// A capacity of zero is raised to one; a queue that can hold nothing
    /// would reject every offer.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Attempts to enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns the item with `QueueError::Closed` if the queue is closed, or
    /// with `QueueError::QueueFull` if it is at capacity.
    pub fn offer(&self, item: T) -> Result<(), Rejected<T>> {
        {
            let mut items = self.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(Rejected {
                    error: QueueError::Closed,
                    item,
                });
            }
            if items.len() >= self.capacity {
                return Err(Rejected {
                    error: QueueError::QueueFull,
                    item,
                });
            }
            items.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Attempts to dequeue without waiting.
    ///
    /// Items left in a closed queue are still returned.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::QueueEmpty` if there is nothing to take.
    pub fn poll(&self) -> Result<T, QueueError> {
        let item = self.lock().pop_front().ok_or(QueueError::QueueEmpty)?;
        self.not_full.notify_one();
        Ok(item)
    }

    /// Enqueues an item, waiting for a free slot.
    ///
    /// With `timeout` set the wait is bounded by a deadline computed once on
    /// entry; without it the call waits until a slot frees up or the queue
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns the item with `QueueError::PutTimeout` when the deadline
    /// passes, or with `QueueError::Closed` if the queue is or becomes closed.
    pub async fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), Rejected<T>> {
        let deadline = timeout.and_then(deadline_after);
        let mut item = item;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            item = match self.offer(item) {
                Ok(()) => return Ok(()),
                Err(Rejected {
                    error: QueueError::QueueFull,
                    item,
                }) => item,
                Err(rejected) => return Err(rejected),
            };

            if !wait_until(notified, deadline).await {
                return Err(Rejected {
                    error: QueueError::PutTimeout(timeout.unwrap_or_default()),
                    item,
                });
            }
        }
    }

    /// Dequeues the oldest item, waiting until one is available.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::TakeTimeout` when the deadline passes, or
    /// `QueueError::Closed` once the queue is closed and fully drained.
    pub async fn take(&self, timeout: Option<Duration>) -> Result<T, QueueError> {
        let deadline = timeout.and_then(deadline_after);

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll() {
                Ok(item) => return Ok(item),
                Err(_) if self.is_closed() => return Err(QueueError::Closed),
                Err(_) => {}
            }

            if !wait_until(notified, deadline).await {
                return Err(QueueError::TakeTimeout(timeout.unwrap_or_default()));
            }
        }
    }

    /// Closes the queue. Idempotent.
    ///
    /// Parked producers fail with `Closed`; parked consumers keep draining
    /// and fail with `Closed` once nothing is left.
    pub fn close(&self) {
        {
            let _items = self.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Deadline `timeout` from now, or `None` when it lies beyond what an
/// `Instant` can represent. `None` means waiting without a deadline.
pub(super) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Waits for `notified`, giving up at `deadline`. Returns `false` on timeout.
pub(super) async fn wait_until(
    notified: Pin<&mut Notified<'_>>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, notified).await.is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_error_display() {
        assert!(QueueError::QueueFull.to_string().contains("full"));
        assert!(QueueError::QueueEmpty.to_string().contains("empty"));
        assert!(QueueError::Closed.to_string().contains("closed"));

        let err = QueueError::PutTimeout(Duration::from_millis(30));
        assert!(err.to_string().contains("30ms"));

        let err = QueueError::TakeTimeout(Duration::from_secs(2));
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn test_offer_rejects_at_capacity_and_returns_item() {
        let queue = BoundedQueue::new(2);
        queue.offer(1).expect("first offer");
        queue.offer(2).expect("second offer");

        let rejected = queue.offer(3).expect_err("queue should be full");
        assert_eq!(rejected.error, QueueError::QueueFull);
        assert_eq!(rejected.into_inner(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_poll_is_fifo() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.offer(i).expect("offer");
        }

        let drained: Vec<_> = std::iter::from_fn(|| queue.poll().ok()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert_eq!(queue.poll(), Err(QueueError::QueueEmpty));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_close_rejects_offers_but_allows_drain() {
        let queue = BoundedQueue::new(3);
        queue.offer("a").expect("offer");
        queue.offer("b").expect("offer");
        queue.close();
        queue.close();

        let rejected = queue.offer("c").expect_err("closed queue rejects");
        assert_eq!(rejected.error, QueueError::Closed);
        assert_eq!(queue.poll(), Ok("a"));
        assert_eq!(queue.poll(), Ok("b"));
        assert_eq!(queue.poll(), Err(QueueError::QueueEmpty));
    }

    #[tokio::test]
    async fn test_take_times_out_on_empty_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        let started = std::time::Instant::now();

        let result = queue.take(Some(Duration::from_millis(50))).await;

        assert_eq!(result, Err(QueueError::TakeTimeout(Duration::from_millis(50))));
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_put_times_out_on_full_queue() {
        let queue = BoundedQueue::new(1);
        queue.offer(1).expect("offer");

        let rejected = queue
            .put(2, Some(Duration::from_millis(30)))
            .await
            .expect_err("put should time out");

        assert_eq!(rejected.error, QueueError::PutTimeout(Duration::from_millis(30)));
        assert_eq!(rejected.item, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unrepresentable_timeout_waits_without_deadline() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.offer(7).expect("offer");
        assert_eq!(queue.take(Some(Duration::MAX)).await, Ok(7));

        queue.offer(8).expect("offer");
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(9, Some(Duration::MAX)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.poll(), Ok(8));
        producer
            .await
            .expect("producer task")
            .expect("put should succeed once a slot frees");

        assert_eq!(queue.take(Some(Duration::MAX)).await, Ok(9));
        queue.close();
        assert_eq!(queue.take(Some(Duration::MAX)).await, Err(QueueError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_take_wakes_on_offer() {
        let queue = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take(Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.offer(42).expect("offer");

        let taken = consumer.await.expect("consumer task");
        assert_eq!(taken, Ok(42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_put_wakes_when_slot_frees() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.offer(1).expect("offer");

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(2, Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.poll(), Ok(1));

        producer
            .await
            .expect("producer task")
            .expect("put should succeed once a slot frees");
        assert_eq!(queue.poll(), Ok(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_wakes_parked_consumers() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take(None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .expect("consumer task");
        assert_eq!(result, Err(QueueError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_consumers_receive_each_item_once() {
        let queue = Arc::new(BoundedQueue::new(8));
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(item) = queue.take(Some(Duration::from_millis(200))).await {
                    seen.push(item);
                }
                seen
            }));
        }

        for i in 0..100u32 {
            queue
                .put(i, Some(Duration::from_secs(5)))
                .await
                .expect("put");
        }

        let mut all = Vec::new();
        for consumer in futures::future::join_all(consumers).await {
            all.extend(consumer.expect("consumer task"));
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
