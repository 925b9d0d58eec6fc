//! Fixed-capacity MPMC ring buffer. `push`/`pop` never block; callers that
//! want to wait briefly for room use [`BoundedQueue::push_spin`].
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A bounded multi-producer, multi-consumer queue. Every successfully
/// pushed item is popped exactly once; the queue never invents or drops
/// items under any interleaving (see the crate's `queue_linearizability`
/// integration test for the property this enforces).
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to enqueue `item`. Returns `false` (and hands `item` back)
    /// when the queue is already at capacity.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.len() >= self.capacity {
            return Err(item);
        }
        guard.push_back(item);
        Ok(())
    }

    /// Dequeue the oldest item, or `None` when the queue is empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Spin-with-yield variant of [`Self::push`]: retries until `item` is
    /// accepted or `budget` elapses, yielding the thread between attempts.
    /// Mirrors the API contract's "send may block briefly on the TX queue's
    /// push" back-pressure rule.
    pub fn push_spin(&self, mut item: T, budget: Duration) -> Result<(), T> {
        let deadline = Instant::now() + budget;
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if Instant::now() >= deadline {
                        return Err(item);
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Drain every currently queued item into `sink`, oldest first. Used by
    /// the tick driver to pull a full batch without re-locking per item.
    pub fn drain_into(&self, sink: &mut Vec<T>) {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        sink.extend(guard.drain(..));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_fails_past_capacity() {
        let q = BoundedQueue::new(2);
        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_ok());
        assert_eq!(q.push(3), Err(3));
    }

    #[test]
    fn pop_returns_none_when_empty() {
        let q: BoundedQueue<u8> = BoundedQueue::new(4);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn fifo_ordering_within_one_producer() {
        let q = BoundedQueue::new(8);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        let popped: Vec<_> = (0..5).map(|_| q.pop().unwrap()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    // Property S6 / universal invariant 6: under any producer/consumer
    // interleaving, sum(pushed) == sum(popped) + current_size.
    #[test]
    fn linearizable_under_concurrent_producers_and_consumers() {
        let q = Arc::new(BoundedQueue::new(64));
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let item = p * PER_PRODUCER + i;
                        while q.push(item).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let q_consumer = Arc::clone(&q);
        let total_expected = PRODUCERS * PER_PRODUCER;
        let consumer = thread::spawn(move || {
            let mut seen = Vec::with_capacity(total_expected);
            while seen.len() < total_expected {
                if let Some(item) = q_consumer.pop() {
                    seen.push(item);
                } else {
                    thread::yield_now();
                }
            }
            seen
        });

        for p in producers {
            p.join().unwrap();
        }
        let mut seen = consumer.join().unwrap();
        seen.sort_unstable();
        let expected: Vec<_> = (0..total_expected).collect();
        assert_eq!(seen, expected);
        assert_eq!(q.len(), 0);
    }
}
