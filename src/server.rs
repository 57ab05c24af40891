//! Bridge Server: composition root.
//!
//! Wires the bus client's telemetry into the state cache and the session
//! manager, mounts the HTTP and WebSocket routes, and runs until the
//! shutdown token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::bus::{BusClient, BusSettings, BusTransport, WsBusTransport};
use crate::config::BridgeConfig;
use crate::domain::StateCache;
use crate::error::BridgeError;
use crate::service::{CommandSink, CommandTranslator};
use crate::ws::handler::ws_handler;
use crate::ws::{SessionManager, SessionOptions};

/// Builds the full router: REST API, `/health` and `/ws`.
///
/// `request_timeout` bounds the REST routes only; an upgraded WebSocket
/// lives as long as its session.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(api::build_router().layer(TimeoutLayer::new(request_timeout)))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// A bound, not yet running bridge.
#[derive(Debug)]
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    bus: BusClient,
    state: AppState,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl BridgeServer {
    /// Binds the listener and assembles the bridge against the rosbridge
    /// endpoint named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the configuration is
    /// invalid or the listen address cannot be bound.
    pub async fn bind(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let transport = Arc::new(WsBusTransport::new(
            config.bus_endpoint.clone(),
            config.connect_timeout(),
        ));
        Self::bind_with_transport(config, transport).await
    }

    /// Like [`BridgeServer::bind`] with a caller-supplied bus transport.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the configuration is
    /// invalid or the listen address cannot be bound.
    pub async fn bind_with_transport(
        config: &BridgeConfig,
        transport: Arc<dyn BusTransport>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Configuration(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Configuration(format!("cannot read bound address: {e}")))?;

        let cache = StateCache::new();
        let mut bus = BusClient::new(transport, BusSettings::from(config));
        let publisher = bus.publisher();
        let translator = Arc::new(CommandTranslator::new(
            Arc::new(publisher.clone()) as Arc<dyn CommandSink>,
            config.dedup_window,
        ));
        let sessions = Arc::new(SessionManager::new(
            cache.clone(),
            Arc::clone(&translator),
            config.queue_depth,
        ));

        {
            let cache = cache.clone();
            let sessions = Arc::clone(&sessions);
            bus.on_telemetry(move |state| {
                if let Some(snapshot) = cache.update(state) {
                    sessions.broadcast_state(&snapshot);
                }
            });
        }
        {
            let translator = Arc::clone(&translator);
            bus.on_undelivered(move |session_id, id| translator.release(session_id, id));
        }

        let state = AppState {
            sessions,
            translator,
            cache,
            publisher,
            session_options: SessionOptions::from(config),
            shutdown: CancellationToken::new(),
        };

        tracing::info!(
            addr = %local_addr,
            bus = %config.bus_endpoint,
            command_topic = %config.command_topic,
            state_topic = %config.state_topic,
            "gripper-bridge bound"
        );

        Ok(Self {
            listener,
            local_addr,
            bus,
            state,
            request_timeout: config.request_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared state handed to every handler.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the bridge when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Runs the bus client and the HTTP server until the shutdown token is
    /// cancelled, then waits (bounded) for every session to close.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if the HTTP server fails.
    pub async fn run(self) -> Result<(), BridgeError> {
        let Self {
            listener,
            local_addr,
            bus,
            state,
            request_timeout,
            shutdown_timeout,
        } = self;
        let shutdown = state.shutdown.clone();
        let sessions = Arc::clone(&state.sessions);

        let bus_task = tokio::spawn(bus.run(shutdown.clone()));
        tracing::info!(addr = %local_addr, "server listening");

        let server_shutdown = shutdown.clone();
        let served = axum::serve(listener, build_router(state, request_timeout))
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .map_err(|e| BridgeError::Internal(format!("http server failed: {e}")));

        shutdown.cancel();
        tracing::info!(sessions = sessions.len(), "shutting down");
        if tokio::time::timeout(shutdown_timeout, sessions.wait_until_empty())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = sessions.len(),
                "shutdown timed out after {shutdown_timeout:?} with sessions still open"
            );
        }
        if tokio::time::timeout(shutdown_timeout, bus_task).await.is_err() {
            tracing::warn!("bus client did not stop within {shutdown_timeout:?}");
        }
        tracing::info!("gripper-bridge stopped");
        served
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("ctrl-c received"),
        () = terminate => tracing::info!("SIGTERM received"),
    }
}
