//! Capacity-bounded single-consumer, multi-producer FIFO with cooperative
//! backpressure. No value is ever dropped except after `finish()`, and a
//! cancelled wait never reserves a slot it didn't take.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

struct Inner<T> {
    buf: VecDeque<T>,
    capacity: usize,
    finished: bool,
}

pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items in flight.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "BoundedQueue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                finished: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Appends `value`. Silently dropped if the queue has already been
    /// finished. Suspends the caller while the queue is full; the wait is
    /// enrolled before the lock is released so a `finish()` racing with a
    /// full queue can never be missed.
    pub async fn enqueue(&self, value: T) {
        loop {
            let notified = {
                let mut guard = self.inner.lock().unwrap();
                if guard.finished {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("enqueue on finished queue, dropping value");
                    return;
                }
                if guard.buf.len() < guard.capacity {
                    guard.buf.push_back(value);
                    drop(guard);
                    self.not_empty.notify_one();
                    return;
                }
                // Full: enroll for a wakeup before releasing the lock so a
                // concurrent dequeue()/finish() between here and the await
                // below can't be missed. `value` is only moved on the
                // branch above, which returns, so it is still live here.
                let notified = self.not_full.notified();
                drop(guard);
                notified
            };
            notified.await;
        }
    }

    /// Removes and returns the head of the queue. Suspends the caller while
    /// the queue is empty and not finished; returns `None` once finished and
    /// drained.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = {
                let mut guard = self.inner.lock().unwrap();
                if let Some(value) = guard.buf.pop_front() {
                    drop(guard);
                    self.not_full.notify_one();
                    return Some(value);
                }
                if guard.finished {
                    return None;
                }
                self.not_empty.notified()
            };
            notified.await;
        }
    }

    /// Marks the queue terminal. Wakes every waiting consumer (they observe
    /// `None`) and every waiting producer (they observe `finished` and drop
    /// their value). Safe to call more than once.
    pub fn finish(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.finished {
            return;
        }
        guard.finished = true;
        drop(guard);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_is_preserved_across_producers() {
        let queue = Arc::new(BoundedQueue::new(8));
        for i in 0..5 {
            queue.enqueue(i).await;
        }
        for i in 0..5 {
            assert_eq!(queue.dequeue().await, Some(i));
        }
    }

    #[tokio::test]
    async fn producer_suspends_when_full_and_resumes_on_dequeue() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.enqueue(1u32).await;

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.enqueue(2u32).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.dequeue().await, Some(1));
        producer.await.unwrap();
        assert_eq!(queue.dequeue().await, Some(2));
    }

    #[tokio::test]
    async fn finish_wakes_waiting_consumer_with_none() {
        let queue = Arc::new(BoundedQueue::<u32>::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.finish();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let queue = BoundedQueue::<u32>::new(4);
        queue.finish();
        queue.finish();
        assert!(queue.is_finished());
    }

    #[tokio::test]
    async fn dequeue_after_finish_drains_remaining_then_returns_none() {
        let queue = BoundedQueue::new(4);
        queue.enqueue(1u32).await;
        queue.enqueue(2u32).await;
        queue.finish();

        assert_eq!(queue.dequeue().await, Some(1));
        assert_eq!(queue.dequeue().await, Some(2));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn enqueue_after_finish_silently_drops() {
        let queue = BoundedQueue::new(4);
        queue.finish();
        queue.enqueue(1u32).await;
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn cancelled_dequeue_does_not_reserve_a_slot() {
        let queue = BoundedQueue::<u32>::new(4);
        // Times out and drops the dequeue future before anything is enqueued.
        let _ = tokio::time::timeout(Duration::from_millis(5), queue.dequeue()).await;

        queue.enqueue(7).await;
        assert_eq!(queue.dequeue().await, Some(7));
    }
}
