//! Per-session task.
//!
//! One task per WebSocket: it reads client frames, drains the session's
//! outbound queue onto the socket and drives the session through
//! `Active -> Closing -> Closed`. Whatever ends the loop, the session is
//! removed from the manager before the task returns.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::messages::ServerFrame;
use super::outbound::Outbound;
use super::session::SessionHandle;
use super::session_manager::SessionManager;
use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Timing knobs for session tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Close the session after this long without an inbound frame.
    pub idle_timeout: Duration,
    /// Upper bound on flushing queued frames once closing starts.
    pub drain_timeout: Duration,
}

impl From<&BridgeConfig> for SessionOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

#[derive(Debug)]
enum CloseReason {
    Shutdown,
    IdleTimeout,
    PeerClosed,
    Removed,
    Io(BridgeError),
}

impl CloseReason {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Shutdown => "server shutting down",
            Self::IdleTimeout => "idle timeout",
            Self::PeerClosed => "client closed",
            Self::Removed => "session removed",
            Self::Io(_) => "socket error",
        }
    }

    /// Whether the socket can still take a drain and a close frame.
    const fn can_drain(&self) -> bool {
        matches!(self, Self::Shutdown | Self::IdleTimeout | Self::Removed)
    }

    const fn close_code(&self) -> u16 {
        match self {
            Self::Shutdown => close_code::AWAY,
            _ => close_code::NORMAL,
        }
    }
}

/// Runs one session until the client leaves, the idle timeout fires, a
/// socket error occurs or `shutdown` is cancelled.
pub async fn run_session(
    socket: WebSocket,
    manager: Arc<SessionManager>,
    session: Arc<SessionHandle>,
    options: SessionOptions,
    shutdown: CancellationToken,
) {
    let session_id = session.id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    session.activate();

    let idle = tokio::time::sleep(options.idle_timeout);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            () = &mut idle => break CloseReason::IdleTimeout,
            msg = ws_rx.next() => {
                idle.as_mut().reset(Instant::now() + options.idle_timeout);
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        manager.on_client_message(session_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::Io(BridgeError::from(e)),
                }
            }
            item = session.outbound().pop() => match item {
                Some(item) => {
                    if let Err(e) = send_item(&mut ws_tx, &session, item).await {
                        break CloseReason::Io(e);
                    }
                }
                None => break CloseReason::Removed,
            },
        }
    };

    session.begin_close();
    if reason.can_drain() {
        let drain = async {
            while let Some(item) = session.outbound().try_pop() {
                send_item(&mut ws_tx, &session, item).await?;
            }
            ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: reason.close_code(),
                    reason: Utf8Bytes::from_static(reason.describe()),
                })))
                .await
                .map_err(BridgeError::from)
        };
        match tokio::time::timeout(options.drain_timeout, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%session_id, error = %e, "drain failed"),
            Err(_) => tracing::debug!(%session_id, "drain timed out"),
        }
    }
    session.mark_closed();
    manager.remove(session_id);

    match &reason {
        CloseReason::Io(e) => {
            tracing::warn!(%session_id, error = %e, "session closed: {}", reason.describe());
        }
        _ => tracing::info!(
            %session_id,
            last_seen = session.last_seen_sequence(),
            "session closed: {}",
            reason.describe()
        ),
    }
}

async fn send_item<S>(tx: &mut S, session: &SessionHandle, item: Outbound) -> Result<(), BridgeError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let (frame, sequence) = match item {
        Outbound::State(state) => (ServerFrame::state(&state), Some(state.sequence)),
        Outbound::Reply(frame) => (frame, None),
    };
    tx.send(Message::text(frame.to_json()?)).await?;
    if let Some(sequence) = sequence {
        session.mark_delivered(sequence);
    }
    Ok(())
}
