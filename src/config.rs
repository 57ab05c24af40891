//! Bridge configuration from command-line flags and environment variables.
//!
//! Every flag has exactly one environment variable override named
//! `GRIPPER_BRIDGE_<FLAG>` (e.g. `--listen-port` /
//! `GRIPPER_BRIDGE_LISTEN_PORT`). A `.env` file is loaded first via
//! `dotenvy`, so it behaves like the process environment.

use std::time::Duration;

use axum::http::Uri;
use clap::Parser;

use crate::error::BridgeError;

/// Default WebSocket listen host.
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
/// Default WebSocket listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
/// Default rosbridge endpoint of the device bus.
pub const DEFAULT_BUS_ENDPOINT: &str = "ws://127.0.0.1:9090";
/// Default topic the driver listens on for commands.
pub const DEFAULT_COMMAND_TOPIC: &str = "/gripper/command";
/// Default topic the driver publishes telemetry on.
pub const DEFAULT_STATE_TOPIC: &str = "/gripper/state";
/// Default message type of the command topic.
pub const DEFAULT_COMMAND_TYPE: &str = "gripper_msgs/msg/GripperCommand";
/// Default message type of the state topic.
pub const DEFAULT_STATE_TYPE: &str = "gripper_msgs/msg/GripperState";

/// Top-level bridge configuration.
///
/// Loaded once at startup via [`BridgeConfig::load`].
#[derive(Debug, Clone, Parser)]
#[command(name = "gripper-bridge", version, about)]
pub struct BridgeConfig {
    /// Host or IP address to accept WebSocket clients on.
    #[arg(long, env = "GRIPPER_BRIDGE_LISTEN_HOST", default_value = DEFAULT_LISTEN_HOST)]
    pub listen_host: String,

    /// TCP port to accept WebSocket clients on.
    #[arg(long, env = "GRIPPER_BRIDGE_LISTEN_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// rosbridge WebSocket endpoint of the device bus (`ws://` or `wss://`).
    #[arg(long, env = "GRIPPER_BRIDGE_BUS_ENDPOINT", default_value = DEFAULT_BUS_ENDPOINT)]
    pub bus_endpoint: String,

    /// Close sessions that send nothing for this many seconds.
    #[arg(long, env = "GRIPPER_BRIDGE_IDLE_TIMEOUT_SECONDS", default_value_t = 300)]
    pub idle_timeout_seconds: u64,

    /// Topic the bridge publishes commands on.
    #[arg(long, env = "GRIPPER_BRIDGE_COMMAND_TOPIC", default_value = DEFAULT_COMMAND_TOPIC)]
    pub command_topic: String,

    /// Topic the bridge subscribes to for telemetry.
    #[arg(long, env = "GRIPPER_BRIDGE_STATE_TOPIC", default_value = DEFAULT_STATE_TOPIC)]
    pub state_topic: String,

    /// Message type advertised for the command topic.
    #[arg(long, env = "GRIPPER_BRIDGE_COMMAND_TYPE", default_value = DEFAULT_COMMAND_TYPE)]
    pub command_type: String,

    /// Message type requested for the state topic.
    #[arg(long, env = "GRIPPER_BRIDGE_STATE_TYPE", default_value = DEFAULT_STATE_TYPE)]
    pub state_type: String,

    /// Per-session outbound queue depth.
    #[arg(long, env = "GRIPPER_BRIDGE_QUEUE_DEPTH", default_value_t = 8)]
    pub queue_depth: usize,

    /// Number of recent command ids remembered per session for replay
    /// protection.
    #[arg(long, env = "GRIPPER_BRIDGE_DEDUP_WINDOW", default_value_t = 32)]
    pub dedup_window: usize,

    /// First reconnect delay after losing the device bus.
    #[arg(long, env = "GRIPPER_BRIDGE_BACKOFF_INITIAL_MS", default_value_t = 500)]
    pub backoff_initial_ms: u64,

    /// Upper bound for the reconnect delay.
    #[arg(long, env = "GRIPPER_BRIDGE_BACKOFF_MAX_MS", default_value_t = 10_000)]
    pub backoff_max_ms: u64,

    /// Timeout for a single device bus connection attempt.
    #[arg(long, env = "GRIPPER_BRIDGE_CONNECT_TIMEOUT_SECONDS", default_value_t = 10)]
    pub connect_timeout_seconds: u64,

    /// How long a closing session may spend flushing its queue.
    #[arg(long, env = "GRIPPER_BRIDGE_DRAIN_TIMEOUT_MS", default_value_t = 1_000)]
    pub drain_timeout_ms: u64,

    /// Upper bound on handling one REST request. Does not apply to `/ws`.
    #[arg(long, env = "GRIPPER_BRIDGE_REQUEST_TIMEOUT_SECONDS", default_value_t = 30)]
    pub request_timeout_seconds: u64,

    /// How long shutdown waits for sessions to close.
    #[arg(long, env = "GRIPPER_BRIDGE_SHUTDOWN_TIMEOUT_SECONDS", default_value_t = 5)]
    pub shutdown_timeout_seconds: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "GRIPPER_BRIDGE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl BridgeConfig {
    /// Loads configuration from flags and environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Exits the process through clap on `--help`, `--version`, or a flag
    /// that cannot be parsed (e.g. a port above 65535).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the parsed values fail
    /// [`BridgeConfig::validate`].
    pub fn load() -> Result<Self, BridgeError> {
        dotenvy::dotenv().ok();
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make correct operation impossible.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.listen_host.trim().is_empty() {
            return Err(config_err("listen-host must not be empty"));
        }
        validate_bus_endpoint(&self.bus_endpoint)?;
        if self.command_topic.is_empty() || self.state_topic.is_empty() {
            return Err(config_err("command-topic and state-topic must not be empty"));
        }
        if self.idle_timeout_seconds == 0 {
            return Err(config_err("idle-timeout-seconds must be positive"));
        }
        if self.queue_depth == 0 {
            return Err(config_err("queue-depth must be at least 1"));
        }
        if self.dedup_window == 0 {
            return Err(config_err("dedup-window must be at least 1"));
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(config_err(
                "backoff-initial-ms must be positive and not exceed backoff-max-ms",
            ));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(config_err("connect-timeout-seconds must be positive"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(config_err("request-timeout-seconds must be positive"));
        }
        if self.drain_timeout_ms == 0 {
            return Err(config_err("drain-timeout-ms must be positive"));
        }
        if self.shutdown_timeout_seconds == 0 {
            return Err(config_err("shutdown-timeout-seconds must be positive"));
        }
        Ok(())
    }

    /// `host:port` string the listener binds to.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Session idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Session drain timeout.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// REST request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Process shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Device bus connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            bus_endpoint: DEFAULT_BUS_ENDPOINT.to_string(),
            idle_timeout_seconds: 300,
            command_topic: DEFAULT_COMMAND_TOPIC.to_string(),
            state_topic: DEFAULT_STATE_TOPIC.to_string(),
            command_type: DEFAULT_COMMAND_TYPE.to_string(),
            state_type: DEFAULT_STATE_TYPE.to_string(),
            queue_depth: 8,
            dedup_window: 32,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            connect_timeout_seconds: 10,
            drain_timeout_ms: 1_000,
            request_timeout_seconds: 30,
            shutdown_timeout_seconds: 5,
            log_json: false,
        }
    }
}

fn config_err(msg: &str) -> BridgeError {
    BridgeError::Configuration(msg.to_string())
}

/// The bus endpoint must be an absolute `ws://` or `wss://` URI with a host.
fn validate_bus_endpoint(endpoint: &str) -> Result<(), BridgeError> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| BridgeError::Configuration(format!("bus-endpoint {endpoint:?}: {e}")))?;
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        _ => {
            return Err(BridgeError::Configuration(format!(
                "bus-endpoint {endpoint:?} must use ws:// or wss://"
            )));
        }
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(BridgeError::Configuration(format!(
            "bus-endpoint {endpoint:?} has no host"
        )));
    }
    Ok(())
}
