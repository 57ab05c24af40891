//! WebSocket message types exchanged with browser clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{GripperState, GripperStatus};
use crate::error::BridgeError;

/// Bridge → client frames, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A gripper state snapshot.
    State {
        /// Bridge-assigned sequence number.
        sequence: u64,
        /// Normalized position.
        position: f64,
        /// Effort proxy.
        effort: f64,
        /// Driver status.
        status: GripperStatus,
        /// Bus-side timestamp in seconds.
        timestamp: f64,
    },
    /// A command or control message was rejected.
    Error {
        /// The offending command's `id`.
        #[serde(rename = "refId")]
        ref_id: String,
        /// First violation found.
        reason: String,
    },
    /// A command was accepted.
    Ack {
        /// The command's `id`.
        #[serde(rename = "refId")]
        ref_id: String,
        /// `true` if the command was a replay and was not re-published.
        duplicate: bool,
    },
    /// Current topic set after a subscribe/unsubscribe.
    Subscriptions {
        /// Subscribed topic names.
        topics: Vec<String>,
    },
}

impl ServerFrame {
    /// Builds a state frame from a snapshot.
    #[must_use]
    pub const fn state(state: &GripperState) -> Self {
        Self::State {
            sequence: state.sequence,
            position: state.position,
            effort: state.effort,
            status: state.status,
            timestamp: state.timestamp,
        }
    }

    /// Builds an error frame echoing `ref_id`.
    #[must_use]
    pub fn error(ref_id: impl Into<String>, err: &BridgeError) -> Self {
        Self::Error {
            ref_id: ref_id.into(),
            reason: err.reason(),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if serialization fails.
    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Internal(e.to_string()))
    }
}

/// A parsed client → bridge message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A gripper command, still untyped; the translator validates it.
    Command(Value),
    /// Add topics to the session's subscription set.
    Subscribe(Vec<String>),
    /// Remove topics from the session's subscription set.
    Unsubscribe(Vec<String>),
}

impl ClientMessage {
    /// Parses a text frame.
    ///
    /// Frames without a `type` field (or with `"type":"command"`) are
    /// commands.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] for malformed JSON, an
    /// unknown `type`, or a control message without a `topics` array.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::invalid("", format!("malformed JSON: {e}")))?;
        let ref_id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let msg_type = match value.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(t)) => Some(t.clone()),
            Some(_) => return Err(BridgeError::invalid(ref_id, "type must be a string")),
        };

        match msg_type.as_deref() {
            None | Some("command") => Ok(Self::Command(value)),
            Some("subscribe") => Ok(Self::Subscribe(topics(&value, &ref_id)?)),
            Some("unsubscribe") => Ok(Self::Unsubscribe(topics(&value, &ref_id)?)),
            Some(_) => Err(BridgeError::invalid(
                ref_id,
                "type must be one of command, subscribe, unsubscribe",
            )),
        }
    }
}

fn topics(value: &Value, ref_id: &str) -> Result<Vec<String>, BridgeError> {
    let Some(items) = value.get("topics").and_then(Value::as_array) else {
        return Err(BridgeError::invalid(ref_id, "topics must be an array of strings"));
    };
    items
        .iter()
        .map(|t| {
            t.as_str()
                .map(str::to_string)
                .ok_or_else(|| BridgeError::invalid(ref_id, "topics must be an array of strings"))
        })
        .collect()
}
