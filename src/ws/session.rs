//! One WebSocket session and its lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::outbound::{OutboundQueue, PushOutcome};
use super::subscription::{SubscriptionManager, Topic};
use crate::domain::{GripperState, SessionId};

/// Session lifecycle phase.
///
/// `Connecting -> Active -> Closing -> Closed`. A session never reaches
/// `Closed` without passing through `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Handshake done, not yet serving.
    Connecting,
    /// Serving traffic.
    Active,
    /// Draining the outbound queue before closing.
    Closing,
    /// Resources released.
    Closed,
}

/// Shared handle to a live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    phase: Mutex<SessionPhase>,
    subscriptions: Mutex<SubscriptionManager>,
    outbound: OutboundQueue,
    last_seen_sequence: AtomicU64,
    connected_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Creates a session in the `Connecting` phase.
    #[must_use]
    pub fn new(id: SessionId, queue_depth: usize, last_seen: Option<u64>) -> Self {
        Self {
            id,
            phase: Mutex::new(SessionPhase::Connecting),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            outbound: OutboundQueue::new(queue_depth),
            last_seen_sequence: AtomicU64::new(last_seen.unwrap_or(0)),
            connected_at: Utc::now(),
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    /// Accept time.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The session's outbound queue.
    #[must_use]
    pub const fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Sequence of the last state delivered to the socket.
    #[must_use]
    pub fn last_seen_sequence(&self) -> u64 {
        self.last_seen_sequence.load(Ordering::Acquire)
    }

    /// Records that the state with `sequence` reached the socket.
    pub fn mark_delivered(&self, sequence: u64) {
        self.last_seen_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Queues `state` if the session is subscribed to it.
    pub fn offer_state(&self, state: Arc<GripperState>) -> Option<PushOutcome> {
        if !lock(&self.subscriptions).matches(Topic::State) {
            return None;
        }
        Some(self.outbound.push_state(state))
    }

    /// Applies `f` to the subscription set.
    pub fn with_subscriptions<R>(&self, f: impl FnOnce(&mut SubscriptionManager) -> R) -> R {
        f(&mut lock(&self.subscriptions))
    }

    /// `Connecting -> Active`. Returns `false` from any other phase.
    pub fn activate(&self) -> bool {
        let mut phase = lock(&self.phase);
        if *phase != SessionPhase::Connecting {
            return false;
        }
        *phase = SessionPhase::Active;
        true
    }

    /// Enters `Closing` and stops accepting outbound items. Returns `false`
    /// if the session was already closing or closed.
    pub fn begin_close(&self) -> bool {
        let mut phase = lock(&self.phase);
        if matches!(*phase, SessionPhase::Closing | SessionPhase::Closed) {
            return false;
        }
        *phase = SessionPhase::Closing;
        self.outbound.close();
        true
    }

    /// `Closing -> Closed`, passing through `Closing` first if needed.
    pub fn mark_closed(&self) {
        let mut phase = lock(&self.phase);
        if *phase != SessionPhase::Closed {
            self.outbound.close();
            *phase = SessionPhase::Closed;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GripperStatus;

    fn state(sequence: u64) -> Arc<GripperState> {
        Arc::new(GripperState {
            position: 0.1,
            effort: 0.0,
            status: GripperStatus::Idle,
            timestamp: 0.0,
            sequence,
        })
    }

    #[test]
    fn lifecycle_runs_in_order() {
        let session = SessionHandle::new(SessionId::new(), 4, None);
        assert_eq!(session.phase(), SessionPhase::Connecting);
        assert!(session.activate());
        assert!(!session.activate());
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert!(session.outbound().is_closed());
        session.mark_closed();
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(!session.begin_close());
    }

    #[test]
    fn unsubscribed_session_is_skipped() {
        let session = SessionHandle::new(SessionId::new(), 4, None);
        assert_eq!(session.offer_state(state(1)), Some(PushOutcome::Queued));
        session.with_subscriptions(|subs| subs.unsubscribe(&[Topic::State]));
        assert_eq!(session.offer_state(state(2)), None);
    }

    #[test]
    fn delivered_sequence_only_moves_forward() {
        let session = SessionHandle::new(SessionId::new(), 4, Some(3));
        assert_eq!(session.last_seen_sequence(), 3);
        session.mark_delivered(7);
        session.mark_delivered(5);
        assert_eq!(session.last_seen_sequence(), 7);
    }
}
