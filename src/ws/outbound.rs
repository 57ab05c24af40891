//! Bounded per-session outbound queue with a drop-oldest policy.
//!
//! The bus side only ever pushes; it never waits on a session. When the
//! queue is full the oldest queued state update is evicted so the newest
//! snapshot always gets through. State pushes carrying a sequence that is
//! not greater than the last one queued are rejected, which keeps every
//! session's delivered sequence strictly increasing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::messages::ServerFrame;
use crate::domain::GripperState;

/// One queued item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A state snapshot to deliver.
    State(Arc<GripperState>),
    /// A direct reply to something the client sent (ack, error, ...).
    Reply(ServerFrame),
}

/// Result of a [`OutboundQueue::push_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued without eviction.
    Queued,
    /// Queued after evicting the oldest entry.
    DroppedOldest,
    /// Rejected: not newer than the last queued state.
    Stale,
    /// Rejected: the queue has been closed.
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Outbound>,
    last_state_seq: Option<u64>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO feeding one session's socket writer.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl OutboundQueue {
    /// Creates an empty queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues a state snapshot, evicting the oldest entry when full.
    pub fn push_state(&self, state: Arc<GripperState>) -> PushOutcome {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return PushOutcome::Closed;
            }
            if inner.last_state_seq.is_some_and(|last| state.sequence <= last) {
                return PushOutcome::Stale;
            }
            inner.last_state_seq = Some(state.sequence);
            let outcome = self.make_room(&mut inner);
            inner.items.push_back(Outbound::State(state));
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Enqueues a reply frame. Returns `false` if the queue is closed.
    pub fn push_reply(&self, frame: ServerFrame) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            self.make_room(&mut inner);
            inner.items.push_back(Outbound::Reply(frame));
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next item. Returns `None` once the queue is closed
    /// and empty.
    ///
    /// Cancel-safe: an item is only removed on the poll that returns it.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes the next item without waiting.
    pub fn try_pop(&self) -> Option<Outbound> {
        self.lock().items.pop_front()
    }

    /// Stops accepting new items. Already queued items can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Total entries evicted by the drop-oldest policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn make_room(&self, inner: &mut Inner) -> PushOutcome {
        if inner.items.len() < self.capacity {
            return PushOutcome::Queued;
        }
        let victim = inner
            .items
            .iter()
            .position(|item| matches!(item, Outbound::State(_)))
            .unwrap_or(0);
        if inner.items.remove(victim).is_some() {
            inner.dropped = inner.dropped.saturating_add(1);
        }
        PushOutcome::DroppedOldest
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::GripperStatus;

    fn state(sequence: u64) -> Arc<GripperState> {
        Arc::new(GripperState {
            position: 0.5,
            effort: 0.0,
            status: GripperStatus::Idle,
            timestamp: 1.0,
            sequence,
        })
    }

    fn seq_of(item: Option<Outbound>) -> u64 {
        let Some(Outbound::State(s)) = item else {
            panic!("expected a state item");
        };
        s.sequence
    }

    #[test]
    fn full_queue_drops_oldest_state() {
        let queue = OutboundQueue::new(3);
        for seq in 1..=3 {
            assert_eq!(queue.push_state(state(seq)), PushOutcome::Queued);
        }
        assert_eq!(queue.push_state(state(4)), PushOutcome::DroppedOldest);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(seq_of(queue.try_pop()), 2);
        assert_eq!(seq_of(queue.try_pop()), 3);
        assert_eq!(seq_of(queue.try_pop()), 4);
    }

    #[test]
    fn never_grows_past_capacity() {
        let queue = OutboundQueue::new(8);
        for seq in 1..=100 {
            queue.push_state(state(seq));
            assert!(queue.len() <= 8);
        }
        assert_eq!(seq_of(queue.try_pop()), 93);
    }

    #[test]
    fn stale_state_is_rejected() {
        let queue = OutboundQueue::new(4);
        queue.push_state(state(5));
        assert_eq!(queue.push_state(state(5)), PushOutcome::Stale);
        assert_eq!(queue.push_state(state(3)), PushOutcome::Stale);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn eviction_prefers_states_over_replies() {
        let queue = OutboundQueue::new(2);
        assert!(queue.push_reply(ServerFrame::Subscriptions { topics: vec![] }));
        queue.push_state(state(1));
        queue.push_state(state(2));
        assert!(matches!(queue.try_pop(), Some(Outbound::Reply(_))));
        assert_eq!(seq_of(queue.try_pop()), 2);
    }

    #[test]
    fn closed_queue_rejects_pushes() {
        let queue = OutboundQueue::new(2);
        queue.close();
        assert_eq!(queue.push_state(state(1)), PushOutcome::Closed);
        assert!(!queue.push_reply(ServerFrame::Subscriptions { topics: vec![] }));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(2));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push_state(state(7));
        let item = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        let Ok(Ok(item)) = item else {
            panic!("pop did not wake");
        };
        assert_eq!(seq_of(item), 7);
    }

    #[test]
    fn pop_is_pending_until_push() {
        let queue = OutboundQueue::new(2);
        let mut pop = tokio_test::task::spawn(queue.pop());
        tokio_test::assert_pending!(pop.poll());
        queue.push_state(state(3));
        assert!(pop.is_woken());
        let item = tokio_test::assert_ready!(pop.poll());
        assert_eq!(seq_of(item), 3);
    }

    #[tokio::test]
    async fn pop_returns_none_after_close_and_drain() {
        let queue = OutboundQueue::new(2);
        queue.push_state(state(1));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }
}
