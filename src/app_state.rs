//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::BusPublisher;
use crate::domain::StateCache;
use crate::service::CommandTranslator;
use crate::ws::{SessionManager, SessionOptions};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live WebSocket sessions.
    pub sessions: Arc<SessionManager>,
    /// Validates and publishes commands (also used by the REST endpoint).
    pub translator: Arc<CommandTranslator>,
    /// Last known gripper state.
    pub cache: StateCache,
    /// Bus link status and command publishing.
    pub publisher: BusPublisher,
    /// Timing knobs handed to each session task.
    pub session_options: SessionOptions,
    /// Root shutdown token; sessions run on child tokens.
    pub shutdown: CancellationToken,
}
