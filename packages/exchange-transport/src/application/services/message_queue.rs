//! Inbound Message Queue
//!
//! Bounded FIFO between the connection task and the drain task. When full,
//! the oldest queued frame is evicted. The frame currently being dispatched
//! counts toward capacity, so a queue of capacity `C` under sustained
//! overload keeps the in-flight frame and the newest `C - 1`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::message::InboundFrame;

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<InboundFrame>,
    in_flight: usize,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued without loss.
    Queued,
    /// Queued after evicting the oldest frame.
    EvictedOldest,
    /// Every slot is in flight; the new frame was discarded.
    ///
    /// Only reachable when the capacity is not above the number of frames
    /// in flight, which with one consumer means capacity 1. Settings reject
    /// that capacity, so the streaming manager always keeps the newest frame.
    Discarded,
}

/// Bounded drop-oldest queue with a single consumer.
#[derive(Debug)]
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` frames, in flight included.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                in_flight: 0,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, evicting the oldest queued frame if full.
    pub fn push(&self, frame: InboundFrame) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.items.len() + inner.in_flight < self.capacity {
                inner.items.push_back(frame);
                PushOutcome::Queued
            } else if inner.items.pop_front().is_some() {
                inner.items.push_back(frame);
                PushOutcome::EvictedOldest
            } else {
                PushOutcome::Discarded
            }
        };

        if outcome == PushOutcome::Queued {
            self.notify.notify_one();
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Take the oldest frame without waiting. The frame is in flight until
    /// [`task_done`](Self::task_done).
    pub fn try_pop(&self) -> Option<InboundFrame> {
        let mut inner = self.inner.lock();
        let frame = inner.items.pop_front()?;
        inner.in_flight += 1;
        Some(frame)
    }

    /// Take the oldest frame, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<InboundFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Mark the in-flight frame as dispatched.
    pub fn task_done(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Discard every queued frame, returning how many were discarded.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.items.len();
        inner.items.clear();
        count
    }

    /// Frames waiting to be dispatched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames lost to overflow.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::domain::message::RawFrame;

    fn frame(n: usize) -> InboundFrame {
        InboundFrame::new(RawFrame::text(n.to_string()))
    }

    fn label(frame: &InboundFrame) -> usize {
        frame.raw.as_text().and_then(|t| t.parse().ok()).unwrap()
    }

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new(4);
        for n in 0..3 {
            assert_eq!(queue.push(frame(n)), PushOutcome::Queued);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop().map(|f| label(&f))).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let queue = MessageQueue::new(2);
        queue.push(frame(0));
        queue.push(frame(1));
        assert_eq!(queue.push(frame(2)), PushOutcome::EvictedOldest);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(label(&queue.try_pop().unwrap()), 1);
    }

    #[test]
    fn in_flight_frame_counts_toward_capacity() {
        let queue = MessageQueue::new(3);
        queue.push(frame(0));
        let in_flight = queue.try_pop().unwrap();
        for n in 1..=5 {
            queue.push(frame(n));
        }
        assert_eq!(label(&in_flight), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 3);
        queue.task_done();
        assert_eq!(label(&queue.try_pop().unwrap()), 4);
    }

    #[test]
    fn single_slot_in_flight_discards_new_frames() {
        let queue = MessageQueue::new(1);
        queue.push(frame(0));
        let _in_flight = queue.try_pop().unwrap();
        assert_eq!(queue.push(frame(1)), PushOutcome::Discarded);
        assert!(queue.is_empty());
        queue.task_done();
        assert_eq!(queue.push(frame(2)), PushOutcome::Queued);
    }

    #[test]
    fn drain_discards_everything_queued() {
        let queue = MessageQueue::new(10);
        for n in 0..4 {
            queue.push(frame(n));
        }
        assert_eq!(queue.drain(), 4);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_timeout_waits_for_push() {
        let queue = std::sync::Arc::new(MessageQueue::new(4));
        let producer = std::sync::Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(frame(7));
        });
        let popped = queue.pop_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(label(&popped), 7);
    }

    #[tokio::test]
    async fn pop_timeout_expires_when_idle() {
        let queue = MessageQueue::new(4);
        assert!(queue.pop_timeout(Duration::from_millis(20)).await.is_none());
    }

    proptest! {
        #[test]
        fn overflow_keeps_in_flight_and_newest(capacity in 1usize..32, extra in 1usize..64) {
            let total = capacity + extra;
            let queue = MessageQueue::new(capacity);

            queue.push(frame(0));
            let in_flight = queue.try_pop().unwrap();
            for n in 1..total {
                queue.push(frame(n));
            }

            let kept: Vec<_> = std::iter::from_fn(|| queue.try_pop().map(|f| label(&f))).collect();
            let expected: Vec<_> = (total - (capacity - 1)..total).collect();

            prop_assert_eq!(label(&in_flight), 0);
            prop_assert_eq!(kept, expected);
            prop_assert_eq!(queue.dropped_count(), (total - capacity) as u64);
        }
    }
}
