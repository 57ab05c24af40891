//! Device bus transport seam.
//!
//! [`BusTransport`] hands the bus client a fresh text-frame link each time
//! it (re)connects. Production uses [`WsBusTransport`], a rosbridge
//! WebSocket client; tests plug in an in-memory transport.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

use crate::error::BridgeError;

/// Outbound half of a bus link.
pub type BusSink = Pin<Box<dyn Sink<String, Error = BridgeError> + Send>>;

/// Inbound half of a bus link. An `Err` item or end of stream means the
/// link is gone.
pub type BusStream = Pin<Box<dyn Stream<Item = Result<String, BridgeError>> + Send>>;

/// One live connection to the device bus.
pub struct BusLink {
    /// Frames to the bus.
    pub sink: BusSink,
    /// Frames from the bus.
    pub stream: BusStream,
}

impl BusLink {
    /// Wraps a sink/stream pair.
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = BridgeError> + Send + 'static,
        R: Stream<Item = Result<String, BridgeError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for BusLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLink").finish_non_exhaustive()
    }
}

/// Opens links to the device bus.
#[async_trait]
pub trait BusTransport: Send + Sync + fmt::Debug + 'static {
    /// Establishes a new link.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusUnavailable`] when the bus cannot be
    /// reached; the caller retries with backoff.
    async fn connect(&self) -> Result<BusLink, BridgeError>;
}

/// rosbridge WebSocket client transport.
#[derive(Debug, Clone)]
pub struct WsBusTransport {
    endpoint: String,
    connect_timeout: Duration,
}

impl WsBusTransport {
    /// Creates a transport for `endpoint` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl BusTransport for WsBusTransport {
    async fn connect(&self) -> Result<BusLink, BridgeError> {
        tracing::debug!(endpoint = %self.endpoint, "connecting to device bus");
        let connect = tokio_tungstenite::connect_async(self.endpoint.as_str());
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                BridgeError::BusUnavailable(format!(
                    "connect to {} timed out after {:?}",
                    self.endpoint, self.connect_timeout
                ))
            })?
            .map_err(|e| BridgeError::BusUnavailable(format!("{}: {e}", self.endpoint)))?;

        let (write, read) = ws.split();
        let sink = write
            .sink_map_err(|e| BridgeError::BusUnavailable(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, BridgeError>(Message::text(text))));
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(BridgeError::BusUnavailable(
                    "device bus closed the connection".to_string(),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(BridgeError::BusUnavailable(e.to_string()))),
            })
        });
        Ok(BusLink::new(sink, stream))
    }
}
