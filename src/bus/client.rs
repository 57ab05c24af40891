//! Device bus client: one logical connection for the process lifetime.
//!
//! [`BusClient::run`] owns the transport link. It performs the rosbridge
//! handshake, forwards queued command frames, decodes telemetry, assigns
//! sequence numbers, and reconnects with jittered exponential backoff
//! after any transport failure. Commands enter through a cloneable
//! [`BusPublisher`] that fails fast while the link is down. Commands that
//! were queued but never written to a link are reported through
//! [`BusClient::on_undelivered`].

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::backoff::Backoff;
use super::protocol::{self, BusFrame};
use super::transport::{BusLink, BusTransport};
use crate::config::BridgeConfig;
use crate::domain::{Command, GripperState, SessionId};
use crate::error::BridgeError;

/// Capacity of the command hand-off between publishers and the link.
const OUTBOUND_CAPACITY: usize = 64;

/// Connection status of the device bus link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// A connection attempt is in progress.
    Connecting,
    /// Handshake complete; commands are accepted.
    Connected,
    /// No link; waiting out the backoff delay.
    Disconnected,
}

/// Topics, message types and retry parameters for the bus client.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Topic commands are published on.
    pub command_topic: String,
    /// Topic telemetry is read from.
    pub state_topic: String,
    /// Message type advertised for the command topic.
    pub command_type: String,
    /// Message type requested for the state topic.
    pub state_type: String,
    /// First reconnect delay in milliseconds.
    pub backoff_initial_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub backoff_max_ms: u64,
}

impl From<&BridgeConfig> for BusSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            command_topic: config.command_topic.clone(),
            state_topic: config.state_topic.clone(),
            command_type: config.command_type.clone(),
            state_type: config.state_type.clone(),
            backoff_initial_ms: config.backoff_initial_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }
}

/// An encoded command waiting for the link writer.
#[derive(Debug)]
struct QueuedCommand {
    session_id: SessionId,
    id: String,
    frame: String,
}

/// Cloneable, fire-and-forget command entry point to the bus.
#[derive(Debug, Clone)]
pub struct BusPublisher {
    outbound: mpsc::Sender<QueuedCommand>,
    link: watch::Receiver<LinkStatus>,
    command_topic: Arc<str>,
}

impl BusPublisher {
    /// Queues `cmd` for publication on the command topic.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusUnavailable`] immediately when the link
    /// is not connected or the hand-off buffer is full; nothing is queued
    /// in that case.
    pub fn publish_command(&self, cmd: &Command) -> Result<(), BridgeError> {
        if *self.link.borrow() != LinkStatus::Connected {
            return Err(BridgeError::BusUnavailable(
                "device bus not connected".to_string(),
            ));
        }
        let frame = protocol::encode_command(&self.command_topic, cmd)?;
        let queued = QueuedCommand {
            session_id: cmd.session_id,
            id: cmd.id.clone(),
            frame,
        };
        self.outbound.try_send(queued).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::BusUnavailable("command buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::BusUnavailable("bus client stopped".to_string())
            }
        })
    }

    /// Current link status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        *self.link.borrow()
    }

    /// A receiver that observes every link status change.
    #[must_use]
    pub fn watch_link(&self) -> watch::Receiver<LinkStatus> {
        self.link.clone()
    }
}

/// Callback invoked once per accepted telemetry message.
pub type TelemetryHandler = Box<dyn Fn(GripperState) + Send + Sync>;

/// Callback invoked with `(session, id)` for every accepted command whose
/// frame was dropped because the link ended first.
pub type UndeliveredHandler = Box<dyn Fn(SessionId, &str) + Send + Sync>;

/// Why a served link ended.
enum LinkEnd {
    Shutdown,
    Lost(BridgeError),
}

/// Owner of the device bus connection.
pub struct BusClient {
    transport: Arc<dyn BusTransport>,
    settings: BusSettings,
    publisher: BusPublisher,
    outbound_rx: mpsc::Receiver<QueuedCommand>,
    link_tx: watch::Sender<LinkStatus>,
    handler: Option<TelemetryHandler>,
    undelivered: Option<UndeliveredHandler>,
    sequence: u64,
    last_state: Option<GripperState>,
}

impl fmt::Debug for BusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusClient")
            .field("transport", &self.transport)
            .field("settings", &self.settings)
            .field("sequence", &self.sequence)
            .field("has_handler", &self.handler.is_some())
            .field("has_undelivered_handler", &self.undelivered.is_some())
            .finish_non_exhaustive()
    }
}

impl BusClient {
    /// Creates a client; nothing connects until [`BusClient::run`].
    #[must_use]
    pub fn new(transport: Arc<dyn BusTransport>, settings: BusSettings) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (link_tx, link) = watch::channel(LinkStatus::Disconnected);
        let publisher = BusPublisher {
            outbound,
            link,
            command_topic: Arc::from(settings.command_topic.as_str()),
        };
        Self {
            transport,
            settings,
            publisher,
            outbound_rx,
            link_tx,
            handler: None,
            undelivered: None,
            sequence: 0,
            last_state: None,
        }
    }

    /// Returns a publisher handle for the command path.
    #[must_use]
    pub fn publisher(&self) -> BusPublisher {
        self.publisher.clone()
    }

    /// See [`BusPublisher::publish_command`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusUnavailable`] while the link is down.
    pub fn publish_command(&self, cmd: &Command) -> Result<(), BridgeError> {
        self.publisher.publish_command(cmd)
    }

    /// Registers the telemetry handler, replacing any previous one.
    ///
    /// The handler runs on the bus task in delivery order and must not
    /// block.
    pub fn on_telemetry<F>(&mut self, handler: F)
    where
        F: Fn(GripperState) + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Registers the handler told about accepted commands that never
    /// reached the bus, replacing any previous one.
    pub fn on_undelivered<F>(&mut self, handler: F)
    where
        F: Fn(SessionId, &str) + Send + Sync + 'static,
    {
        self.undelivered = Some(Box::new(handler));
    }

    /// Runs the connect / serve / backoff loop until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut backoff =
            Backoff::new(self.settings.backoff_initial_ms, self.settings.backoff_max_ms);
        let mut outage_reported = false;

        loop {
            self.set_link(LinkStatus::Connecting);
            let transport = Arc::clone(&self.transport);
            let connected = tokio::select! {
                () = shutdown.cancelled() => break,
                result = transport.connect() => result,
            };

            match connected {
                Ok(link) => {
                    backoff.reset();
                    outage_reported = false;
                    match self.serve(link, &shutdown).await {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(err) => {
                            self.set_link(LinkStatus::Disconnected);
                            self.discard_queued();
                            tracing::warn!(error = %err, "device bus link lost");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        attempt = backoff.attempt(),
                        error = %err,
                        "device bus connect failed"
                    );
                }
            }

            self.set_link(LinkStatus::Disconnected);
            if !outage_reported {
                self.report_outage();
                outage_reported = true;
            }

            let delay = backoff.next_delay();
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = backoff.attempt(),
                "reconnecting to device bus"
            );
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_link(LinkStatus::Disconnected);
        tracing::info!(sequence = self.sequence, "bus client stopped");
    }

    async fn serve(&mut self, link: BusLink, shutdown: &CancellationToken) -> LinkEnd {
        let BusLink {
            mut sink,
            mut stream,
        } = link;

        let handshake = [
            BusFrame::Advertise {
                topic: self.settings.command_topic.clone(),
                msg_type: self.settings.command_type.clone(),
            },
            BusFrame::Subscribe {
                topic: self.settings.state_topic.clone(),
                msg_type: self.settings.state_type.clone(),
            },
        ];
        for frame in handshake {
            let text = match frame.to_text() {
                Ok(text) => text,
                Err(err) => return LinkEnd::Lost(err),
            };
            if let Err(err) = sink.send(text).await {
                return LinkEnd::Lost(err);
            }
        }

        self.discard_queued();
        self.set_link(LinkStatus::Connected);
        tracing::info!(topic = %self.settings.state_topic, "device bus connected");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return LinkEnd::Shutdown;
                }
                queued = self.outbound_rx.recv() => {
                    let Some(QueuedCommand { session_id, id, frame }) = queued else {
                        return LinkEnd::Shutdown;
                    };
                    if let Err(err) = sink.send(frame).await {
                        self.set_link(LinkStatus::Disconnected);
                        self.report_undelivered(session_id, &id);
                        return LinkEnd::Lost(err);
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(err)) => return LinkEnd::Lost(err),
                    None => {
                        return LinkEnd::Lost(BridgeError::BusUnavailable(
                            "device bus stream ended".to_string(),
                        ));
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match protocol::decode_telemetry(text, &self.settings.state_topic) {
            Ok(Some(reading)) => {
                let state = reading.into_state(self.next_sequence());
                tracing::trace!(sequence = state.sequence, status = %state.status, "telemetry");
                self.last_state = Some(state.clone());
                self.dispatch(state);
            }
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(%reason, "undecodable telemetry skipped");
            }
        }
    }

    /// Drops every queued command and reports each one as undelivered.
    fn discard_queued(&mut self) {
        let mut discarded = 0usize;
        while let Ok(queued) = self.outbound_rx.try_recv() {
            self.report_undelivered(queued.session_id, &queued.id);
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!(count = discarded, "discarded commands queued on a dead link");
        }
    }

    fn report_undelivered(&self, session_id: SessionId, id: &str) {
        tracing::debug!(%session_id, id, "command not delivered");
        if let Some(handler) = &self.undelivered {
            handler(session_id, id);
        }
    }

    /// Emits the derived `ERROR` state for the current outage.
    fn report_outage(&mut self) {
        let sequence = self.next_sequence();
        let state = GripperState::derived_error(self.last_state.as_ref(), sequence);
        tracing::info!(sequence, "broadcasting bus outage state");
        self.dispatch(state);
    }

    fn dispatch(&self, state: GripperState) {
        if let Some(handler) = &self.handler {
            handler(state);
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence = self.sequence.saturating_add(1);
        self.sequence
    }

    fn set_link(&self, status: LinkStatus) {
        self.link_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?status, "bus link status");
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::{sink, stream};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    use super::*;
    use crate::domain::{GripperAction, GripperStatus, SessionId};

    /// The bus side of an in-memory link.
    struct FakeBus {
        published: UnboundedReceiver<String>,
        telemetry: UnboundedSender<Result<String, BridgeError>>,
    }

    fn fake_link() -> (BusLink, FakeBus) {
        let (pub_tx, published) = unbounded_channel::<String>();
        let (telemetry, tel_rx) = unbounded_channel::<Result<String, BridgeError>>();
        let sink = sink::unfold(pub_tx, |tx, frame: String| async move {
            tx.send(frame)
                .map_err(|_| BridgeError::BusUnavailable("fake bus gone".to_string()))?;
            Ok::<_, BridgeError>(tx)
        });
        let stream = stream::unfold(tel_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (BusLink::new(sink, stream), FakeBus { published, telemetry })
    }

    /// Hands out prepared links in order; fails once they run out.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        links: Mutex<VecDeque<BusLink>>,
    }

    #[async_trait]
    impl BusTransport for ScriptedTransport {
        async fn connect(&self) -> Result<BusLink, BridgeError> {
            let next = self
                .links
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            next.ok_or_else(|| BridgeError::BusUnavailable("no link scripted".to_string()))
        }
    }

    fn settings() -> BusSettings {
        BusSettings {
            command_topic: "/gripper/command".to_string(),
            state_topic: "/gripper/state".to_string(),
            command_type: "gripper_msgs/msg/GripperCommand".to_string(),
            state_type: "gripper_msgs/msg/GripperState".to_string(),
            backoff_initial_ms: 10,
            backoff_max_ms: 40,
        }
    }

    fn telemetry(position: f64, status: &str) -> Result<String, BridgeError> {
        Ok(format!(
            r#"{{"op":"publish","topic":"/gripper/state","msg":{{"position":{position},"effort":0.5,"status":"{status}"}}}}"#
        ))
    }

    async fn recv_state(rx: &mut UnboundedReceiver<GripperState>) -> GripperState {
        let Ok(Some(state)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await else {
            panic!("expected a state");
        };
        state
    }

    async fn wait_connected(publisher: &BusPublisher) {
        let mut link = publisher.watch_link();
        let waited = tokio::time::timeout(
            Duration::from_secs(2),
            link.wait_for(|s| *s == LinkStatus::Connected),
        )
        .await;
        assert!(matches!(waited, Ok(Ok(_))), "link never connected");
    }

    fn start(
        links: Vec<BusLink>,
    ) -> (BusPublisher, UnboundedReceiver<GripperState>, CancellationToken) {
        let transport = Arc::new(ScriptedTransport {
            links: Mutex::new(links.into_iter().collect()),
        });
        let mut client = BusClient::new(transport, settings());
        let (state_tx, state_rx) = unbounded_channel();
        client.on_telemetry(move |state| {
            let _ = state_tx.send(state);
        });
        let publisher = client.publisher();
        let shutdown = CancellationToken::new();
        tokio::spawn(client.run(shutdown.clone()));
        (publisher, state_rx, shutdown)
    }

    #[tokio::test]
    async fn publish_fails_fast_while_disconnected() {
        let (publisher, mut states, shutdown) = start(Vec::new());
        let cmd = Command::new("c1".to_string(), SessionId::new(), GripperAction::Open);
        let result = publisher.publish_command(&cmd);
        assert!(matches!(result, Err(BridgeError::BusUnavailable(_))));

        // The failed initial connect produces one derived ERROR state.
        let state = recv_state(&mut states).await;
        assert_eq!(state.status, GripperStatus::Error);
        assert_eq!(state.sequence, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn handshake_then_command_reaches_bus() {
        let (link, mut bus) = fake_link();
        let (publisher, _states, shutdown) = start(vec![link]);
        wait_connected(&publisher).await;

        let Some(advertise) = bus.published.recv().await else {
            panic!("no advertise frame");
        };
        assert!(advertise.contains(r#""op":"advertise""#));
        let Some(subscribe) = bus.published.recv().await else {
            panic!("no subscribe frame");
        };
        assert!(subscribe.contains(r#""op":"subscribe""#));

        let cmd = Command::new(
            "c7".to_string(),
            SessionId::new(),
            GripperAction::SetPosition { position: 0.6 },
        );
        assert!(publisher.publish_command(&cmd).is_ok());
        let Some(frame) = bus.published.recv().await else {
            panic!("no command frame");
        };
        assert!(frame.contains("SET_POSITION"));
        assert!(frame.contains(":c7"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn telemetry_gets_increasing_sequences() {
        let (link, bus) = fake_link();
        let (publisher, mut states, shutdown) = start(vec![link]);
        wait_connected(&publisher).await;

        let _ = bus.telemetry.send(telemetry(0.1, "MOVING"));
        let _ = bus.telemetry.send(Ok(r#"{"op":"publish","topic":"/other","msg":{}}"#.to_string()));
        let _ = bus.telemetry.send(Ok("garbage".to_string()));
        let _ = bus.telemetry.send(telemetry(0.2, "IDLE"));

        let first = recv_state(&mut states).await;
        let second = recv_state(&mut states).await;
        assert_eq!(first.sequence, 1);
        assert_eq!(first.status, GripperStatus::Moving);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.status, GripperStatus::Idle);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn outage_emits_error_and_sequence_continues_after_reconnect() {
        let (first_link, first_bus) = fake_link();
        let (second_link, second_bus) = fake_link();
        let (publisher, mut states, shutdown) = start(vec![first_link, second_link]);
        wait_connected(&publisher).await;

        let _ = first_bus.telemetry.send(telemetry(0.4, "GRIPPING"));
        let before = recv_state(&mut states).await;
        assert_eq!(before.sequence, 1);

        // Dropping the fake bus ends the inbound stream.
        drop(first_bus);
        let outage = recv_state(&mut states).await;
        assert_eq!(outage.status, GripperStatus::Error);
        assert_eq!(outage.sequence, 2);
        assert!((outage.position - 0.4).abs() < f64::EPSILON);

        wait_connected(&publisher).await;
        let _ = second_bus.telemetry.send(telemetry(0.5, "IDLE"));
        let after = recv_state(&mut states).await;
        assert_eq!(after.status, GripperStatus::Idle);
        assert_eq!(after.sequence, 3);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (link, _bus) = fake_link();
        let transport = Arc::new(ScriptedTransport {
            links: Mutex::new(VecDeque::from([link])),
        });
        let client = BusClient::new(transport, settings());
        let publisher = client.publisher();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(client.run(shutdown.clone()));
        wait_connected(&publisher).await;

        shutdown.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert_eq!(publisher.link_status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn commands_stranded_on_a_dead_link_are_reported() {
        let (link, bus) = fake_link();
        let transport = Arc::new(ScriptedTransport {
            links: Mutex::new(VecDeque::from([link])),
        });
        let mut client = BusClient::new(transport, settings());
        let (lost_tx, mut lost_rx) = unbounded_channel();
        client.on_undelivered(move |session_id, id: &str| {
            let _ = lost_tx.send((session_id, id.to_string()));
        });
        let publisher = client.publisher();
        let shutdown = CancellationToken::new();
        tokio::spawn(client.run(shutdown.clone()));
        wait_connected(&publisher).await;

        // The link is gone but the bus task has not noticed yet.
        drop(bus);
        let session_id = SessionId::new();
        let cmd = Command::new("late".to_string(), session_id, GripperAction::Close);
        assert!(publisher.publish_command(&cmd).is_ok());

        let Ok(Some((lost_session, lost_id))) =
            tokio::time::timeout(Duration::from_secs(2), lost_rx.recv()).await
        else {
            panic!("stranded command was not reported");
        };
        assert_eq!(lost_session, session_id);
        assert_eq!(lost_id, "late");
        assert_ne!(publisher.link_status(), LinkStatus::Connected);
        shutdown.cancel();
    }
}
