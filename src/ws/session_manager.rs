//! Session Manager: owns every live session.
//!
//! Fans state out to all subscribed sessions and fans client messages in
//! through the [`CommandTranslator`]. It never waits on a session: a
//! broadcast only pushes onto each bounded outbound queue.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use super::messages::{ClientMessage, ServerFrame};
use super::outbound::PushOutcome;
use super::session::SessionHandle;
use super::subscription::{SubscriptionManager, Topic};
use crate::domain::{GripperState, SessionId, StateCache};
use crate::error::BridgeError;
use crate::service::CommandTranslator;

/// Registry of live WebSocket sessions.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    cache: StateCache,
    translator: Arc<CommandTranslator>,
    queue_depth: usize,
    count: watch::Sender<usize>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(cache: StateCache, translator: Arc<CommandTranslator>, queue_depth: usize) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            sessions: RwLock::new(HashMap::new()),
            cache,
            translator,
            queue_depth,
            count,
        }
    }

    /// Registers a new session and queues its initial snapshot.
    ///
    /// With `last_seen` set, the snapshot is skipped when the cache holds
    /// nothing newer than what the client already applied.
    pub fn accept(&self, last_seen: Option<u64>) -> Arc<SessionHandle> {
        let session = Arc::new(SessionHandle::new(
            SessionId::new(),
            self.queue_depth,
            last_seen,
        ));
        let total = {
            let mut sessions = self.write();
            sessions.insert(session.id(), Arc::clone(&session));
            self.count.send_replace(sessions.len());
            sessions.len()
        };
        // Registered before the snapshot is read, so a concurrent broadcast
        // is either seen here or rejected as stale by the queue.
        let snapshot = self.cache.read();
        let up_to_date = last_seen.is_some_and(|seen| seen >= snapshot.sequence);
        if !up_to_date {
            session.outbound().push_state(snapshot);
        }
        tracing::info!(
            session_id = %session.id(),
            last_seen = ?last_seen,
            snapshot_sent = !up_to_date,
            sessions = total,
            "session accepted"
        );
        session
    }

    /// Handles one text frame from a session.
    ///
    /// Commands go through the translator and are answered with an ack or
    /// an error frame; control messages update the subscription set. Bad
    /// input is answered and never closes the session.
    pub fn on_client_message(&self, session_id: SessionId, raw: &str) {
        let Some(session) = self.get(session_id) else {
            tracing::debug!(%session_id, "message for unknown session dropped");
            return;
        };

        let reply = match ClientMessage::parse(raw) {
            Ok(ClientMessage::Command(value)) => match self.translator.submit(session_id, &value) {
                Ok(receipt) => ServerFrame::Ack {
                    ref_id: receipt.id,
                    duplicate: receipt.duplicate,
                },
                Err(rejection) => {
                    tracing::debug!(
                        %session_id,
                        ref_id = %rejection.ref_id,
                        error = %rejection.error,
                        "command rejected"
                    );
                    ServerFrame::error(rejection.ref_id, &rejection.error)
                }
            },
            Ok(ClientMessage::Subscribe(names)) => {
                update_subscriptions(&session, &names, SubscriptionManager::subscribe)
            }
            Ok(ClientMessage::Unsubscribe(names)) => {
                update_subscriptions(&session, &names, SubscriptionManager::unsubscribe)
            }
            Err(err) => {
                tracing::debug!(%session_id, error = %err, "unreadable client message");
                reply_for(&err)
            }
        };

        if !session.outbound().push_reply(reply) {
            tracing::debug!(%session_id, "reply dropped, session closing");
        }
    }

    /// Pushes `state` onto every subscribed session's queue. Returns the
    /// number of sessions that queued it.
    pub fn broadcast_state(&self, state: &Arc<GripperState>) -> usize {
        let sessions: Vec<Arc<SessionHandle>> = self.read().values().map(Arc::clone).collect();
        let mut delivered = 0;
        for session in sessions {
            match session.offer_state(Arc::clone(state)) {
                Some(PushOutcome::Queued) => delivered += 1,
                Some(PushOutcome::DroppedOldest) => {
                    delivered += 1;
                    tracing::debug!(
                        session_id = %session.id(),
                        sequence = state.sequence,
                        "slow session, oldest queued state dropped"
                    );
                }
                Some(PushOutcome::Stale | PushOutcome::Closed) | None => {}
            }
        }
        delivered
    }

    /// Releases a session. Safe to call more than once; returns `true`
    /// only for the call that actually removed it.
    pub fn remove(&self, session_id: SessionId) -> bool {
        let (removed, total) = {
            let mut sessions = self.write();
            let removed = sessions.remove(&session_id);
            if removed.is_some() {
                self.count.send_replace(sessions.len());
            }
            (removed, sessions.len())
        };
        let Some(session) = removed else {
            return false;
        };
        session.begin_close();
        session.mark_closed();
        self.translator.forget_session(session_id);
        tracing::info!(
            %session_id,
            dropped = session.outbound().dropped(),
            sessions = total,
            "session removed"
        );
        true
    }

    /// Looks up a live session.
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.read().get(&session_id).map(Arc::clone)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Resolves once every session has been removed.
    pub async fn wait_until_empty(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn update_subscriptions(
    session: &SessionHandle,
    names: &[String],
    apply: fn(&mut SubscriptionManager, &[Topic]),
) -> ServerFrame {
    match SubscriptionManager::parse_topics(names) {
        Ok(topics) => {
            let topics = session.with_subscriptions(|subs| {
                apply(subs, &topics);
                subs.names()
            });
            ServerFrame::Subscriptions { topics }
        }
        Err(reason) => reply_for(&BridgeError::invalid("", reason)),
    }
}

fn reply_for(err: &BridgeError) -> ServerFrame {
    let ref_id = match err {
        BridgeError::InvalidCommand { ref_id, .. } => ref_id.clone(),
        _ => String::new(),
    };
    ServerFrame::error(ref_id, err)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{Command, GripperStatus};
    use crate::service::CommandSink;
    use crate::ws::outbound::Outbound;

    #[derive(Debug, Default)]
    struct RecordingSink {
        published: Mutex<Vec<String>>,
    }

    impl CommandSink for RecordingSink {
        fn publish_command(&self, cmd: &Command) -> Result<(), BridgeError> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(cmd.id.clone());
            Ok(())
        }
    }

    fn manager(depth: usize) -> (SessionManager, StateCache, Arc<RecordingSink>) {
        let cache = StateCache::new();
        let sink = Arc::new(RecordingSink::default());
        let translator = Arc::new(CommandTranslator::new(
            Arc::clone(&sink) as Arc<dyn CommandSink>,
            32,
        ));
        (
            SessionManager::new(cache.clone(), translator, depth),
            cache,
            sink,
        )
    }

    fn state(sequence: u64) -> GripperState {
        GripperState {
            position: 0.4,
            effort: 0.2,
            status: GripperStatus::Moving,
            timestamp: 1.0,
            sequence,
        }
    }

    fn next_reply(session: &SessionHandle) -> ServerFrame {
        loop {
            match session.outbound().try_pop() {
                Some(Outbound::Reply(frame)) => return frame,
                Some(Outbound::State(_)) => {}
                None => panic!("no reply queued"),
            }
        }
    }

    #[test]
    fn accept_sends_unknown_sentinel_before_telemetry() {
        let (mgr, _, _) = manager(8);
        let session = mgr.accept(None);
        let Some(Outbound::State(first)) = session.outbound().try_pop() else {
            panic!("expected initial snapshot");
        };
        assert!(first.is_unknown());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn accept_skips_snapshot_when_client_is_current() {
        let (mgr, cache, _) = manager(8);
        cache.update(state(5));
        assert!(mgr.accept(Some(5)).outbound().is_empty());
        assert_eq!(mgr.accept(Some(4)).outbound().len(), 1);
    }

    #[test]
    fn bad_command_gets_error_and_session_survives() {
        let (mgr, _, sink) = manager(8);
        let session = mgr.accept(None);
        mgr.on_client_message(
            session.id(),
            r#"{"id":"c9","kind":"SET_POSITION","params":{"position":2.5}}"#,
        );
        let ServerFrame::Error { ref_id, reason } = next_reply(&session) else {
            panic!("expected error frame");
        };
        assert_eq!(ref_id, "c9");
        assert!(reason.contains("position"));

        mgr.on_client_message(session.id(), r#"{"id":"c10","kind":"STOP"}"#);
        assert_eq!(
            next_reply(&session),
            ServerFrame::Ack {
                ref_id: "c10".to_string(),
                duplicate: false
            }
        );
        assert!(mgr.get(session.id()).is_some());
        assert_eq!(
            *sink.published.lock().unwrap_or_else(PoisonError::into_inner),
            vec!["c10".to_string()]
        );
    }

    #[test]
    fn duplicate_command_is_published_once() {
        let (mgr, _, sink) = manager(8);
        let session = mgr.accept(None);
        mgr.on_client_message(session.id(), r#"{"id":"c1","kind":"OPEN"}"#);
        mgr.on_client_message(session.id(), r#"{"id":"c1","kind":"OPEN"}"#);
        assert_eq!(
            next_reply(&session),
            ServerFrame::Ack {
                ref_id: "c1".to_string(),
                duplicate: false
            }
        );
        assert_eq!(
            next_reply(&session),
            ServerFrame::Ack {
                ref_id: "c1".to_string(),
                duplicate: true
            }
        );
        assert_eq!(
            sink.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            1
        );
    }

    #[test]
    fn unsubscribed_sessions_miss_broadcasts() {
        let (mgr, _, _) = manager(8);
        let a = mgr.accept(Some(0));
        let b = mgr.accept(Some(0));
        mgr.on_client_message(b.id(), r#"{"type":"unsubscribe","topics":["state"]}"#);
        assert_eq!(
            next_reply(&b),
            ServerFrame::Subscriptions { topics: vec![] }
        );

        assert_eq!(mgr.broadcast_state(&Arc::new(state(1))), 1);
        assert_eq!(a.outbound().len(), 1);
        assert!(b.outbound().is_empty());
    }

    #[test]
    fn unknown_topic_is_an_error_reply() {
        let (mgr, _, _) = manager(8);
        let session = mgr.accept(Some(0));
        mgr.on_client_message(session.id(), r#"{"type":"subscribe","topics":["joints"]}"#);
        let ServerFrame::Error { reason, .. } = next_reply(&session) else {
            panic!("expected error frame");
        };
        assert_eq!(reason, "unknown topic: joints");
    }

    #[test]
    fn slow_session_keeps_newest_states_in_order() {
        let (mgr, _, _) = manager(3);
        let session = mgr.accept(Some(0));
        for seq in 1..=10 {
            mgr.broadcast_state(&Arc::new(state(seq)));
        }
        let mut seen = Vec::new();
        while let Some(Outbound::State(s)) = session.outbound().try_pop() {
            seen.push(s.sequence);
        }
        assert_eq!(seen, vec![8, 9, 10]);
    }

    #[test]
    fn remove_is_idempotent() {
        let (mgr, _, _) = manager(8);
        let session = mgr.accept(None);
        assert!(mgr.remove(session.id()));
        assert!(!mgr.remove(session.id()));
        assert!(mgr.is_empty());
        assert_eq!(
            session.phase(),
            crate::ws::session::SessionPhase::Closed
        );
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_after_last_remove() {
        let (mgr, _, _) = manager(8);
        let mgr = Arc::new(mgr);
        let session = mgr.accept(None);
        let waiter = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.wait_until_empty().await })
        };
        mgr.remove(session.id());
        let done = tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await;
        assert!(matches!(done, Ok(Ok(()))));
    }
}
