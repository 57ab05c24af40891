//! rosbridge v2 framing and the gripper driver's message schema.
//!
//! The bridge joins the device bus as a rosbridge client: it advertises
//! the command topic, subscribes to the state topic, and exchanges JSON
//! `op` frames over a single WebSocket.

use serde::{Deserialize, Serialize};

use crate::domain::{Command, GripperState, GripperStatus};
use crate::error::BridgeError;

/// One rosbridge protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BusFrame {
    /// Announce that this client publishes on `topic`.
    Advertise {
        /// Topic name.
        topic: String,
        /// Fully qualified message type.
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// Ask the server to forward messages published on `topic`.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Fully qualified message type.
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// A message on `topic`, in either direction.
    Publish {
        /// Topic name.
        topic: String,
        /// Message body in the driver's schema.
        msg: serde_json::Value,
    },
    /// Status, service and other ops the bridge does not use.
    #[serde(other)]
    Other,
}

impl BusFrame {
    /// Serializes the frame for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if serialization fails.
    pub fn to_text(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Internal(e.to_string()))
    }
}

/// Command message in the driver's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMsg {
    /// `"<session>:<id>"` correlation token.
    pub id: String,
    /// `OPEN`, `CLOSE`, `SET_POSITION` or `STOP`.
    pub kind: String,
    /// Target position for `SET_POSITION`, `null` otherwise.
    pub position: Option<f64>,
}

impl From<&Command> for CommandMsg {
    fn from(cmd: &Command) -> Self {
        Self {
            id: cmd.bus_correlation_id(),
            kind: cmd.action.kind().as_str().to_string(),
            position: cmd.action.target_position(),
        }
    }
}

/// Builds the `publish` frame for a command on `topic`.
///
/// # Errors
///
/// Returns [`BridgeError::Internal`] if serialization fails.
pub fn encode_command(topic: &str, cmd: &Command) -> Result<String, BridgeError> {
    let msg = serde_json::to_value(CommandMsg::from(cmd))
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    BusFrame::Publish {
        topic: topic.to_string(),
        msg,
    }
    .to_text()
}

/// ROS time stamp. ROS 1 spells the fields `secs`/`nsecs`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct Stamp {
    #[serde(alias = "secs")]
    sec: i64,
    #[serde(alias = "nsecs")]
    nanosec: u32,
}

/// Telemetry message in the driver's schema.
#[derive(Debug, Clone, Deserialize)]
struct StateMsg {
    position: f64,
    effort: f64,
    status: String,
    #[serde(default)]
    stamp: Option<Stamp>,
}

/// One decoded telemetry reading, before a sequence number is assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReading {
    /// Normalized position.
    pub position: f64,
    /// Effort proxy.
    pub effort: f64,
    /// Driver status.
    pub status: GripperStatus,
    /// Bus-side time in seconds.
    pub timestamp: f64,
}

impl TelemetryReading {
    /// Stamps the reading with a bridge-assigned sequence number.
    #[must_use]
    pub const fn into_state(self, sequence: u64) -> GripperState {
        GripperState {
            position: self.position,
            effort: self.effort,
            status: self.status,
            timestamp: self.timestamp,
            sequence,
        }
    }
}

/// Decodes an inbound frame.
///
/// Returns `Ok(None)` for frames that are not telemetry on `state_topic`.
///
/// # Errors
///
/// Returns a description of the problem when the frame is not valid
/// rosbridge JSON or the state message does not match the driver schema.
#[allow(clippy::cast_precision_loss)]
pub fn decode_telemetry(text: &str, state_topic: &str) -> Result<Option<TelemetryReading>, String> {
    let frame: BusFrame = serde_json::from_str(text).map_err(|e| format!("bad frame: {e}"))?;
    let BusFrame::Publish { topic, msg } = frame else {
        return Ok(None);
    };
    if topic != state_topic {
        return Ok(None);
    }
    let msg: StateMsg = serde_json::from_value(msg).map_err(|e| format!("bad state msg: {e}"))?;
    if !msg.position.is_finite() || !msg.effort.is_finite() {
        return Err("non-finite position or effort".to_string());
    }
    let status: GripperStatus = msg.status.parse()?;
    let stamp = msg.stamp.unwrap_or_default();
    Ok(Some(TelemetryReading {
        position: msg.position,
        effort: msg.effort,
        status,
        timestamp: stamp.sec as f64 + f64::from(stamp.nanosec) / 1e9,
    }))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::{GripperAction, SessionId};

    const TOPIC: &str = "/gripper/state";

    #[test]
    fn subscribe_frame_shape() {
        let frame = BusFrame::Subscribe {
            topic: TOPIC.to_string(),
            msg_type: "gripper_msgs/msg/GripperState".to_string(),
        };
        let text = frame.to_text().unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
        assert_eq!(value.pointer("/op"), Some(&json!("subscribe")));
        assert_eq!(value.pointer("/topic"), Some(&json!(TOPIC)));
        assert_eq!(
            value.pointer("/type"),
            Some(&json!("gripper_msgs/msg/GripperState"))
        );
    }

    #[test]
    fn command_frame_carries_position_only_for_set_position() {
        let session = SessionId::new();
        let cmd = Command::new(
            "c1".to_string(),
            session,
            GripperAction::SetPosition { position: 0.3 },
        );
        let text = encode_command("/gripper/command", &cmd).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
        assert_eq!(value.pointer("/op"), Some(&json!("publish")));
        assert_eq!(value.pointer("/msg/kind"), Some(&json!("SET_POSITION")));
        assert_eq!(value.pointer("/msg/position"), Some(&json!(0.3)));
        assert_eq!(
            value.pointer("/msg/id"),
            Some(&json!(format!("{session}:c1")))
        );

        let stop = Command::new("c2".to_string(), session, GripperAction::Stop);
        let text = encode_command("/gripper/command", &stop).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
        assert_eq!(value.pointer("/msg/position"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn decodes_state_message() {
        let text = r#"{"op":"publish","topic":"/gripper/state","msg":{"position":0.5,"effort":1.25,"status":"moving","stamp":{"sec":10,"nanosec":500000000}}}"#;
        let Ok(Some(reading)) = decode_telemetry(text, TOPIC) else {
            panic!("expected a reading");
        };
        assert_eq!(reading.status, GripperStatus::Moving);
        assert!((reading.timestamp - 10.5).abs() < 1e-9);
        let state = reading.into_state(3);
        assert_eq!(state.sequence, 3);
    }

    #[test]
    fn accepts_ros1_stamp_spelling() {
        let text = r#"{"op":"publish","topic":"/gripper/state","msg":{"position":0.1,"effort":0,"status":"IDLE","stamp":{"secs":2,"nsecs":0}}}"#;
        let Ok(Some(reading)) = decode_telemetry(text, TOPIC) else {
            panic!("expected a reading");
        };
        assert!((reading.timestamp - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ignores_other_topics_and_ops() {
        let other_topic = r#"{"op":"publish","topic":"/arm/state","msg":{}}"#;
        assert_eq!(decode_telemetry(other_topic, TOPIC), Ok(None));
        let status = r#"{"op":"status","level":"info","msg":"ok"}"#;
        assert_eq!(decode_telemetry(status, TOPIC), Ok(None));
    }

    #[test]
    fn rejects_malformed_state() {
        let bad_status = r#"{"op":"publish","topic":"/gripper/state","msg":{"position":0.1,"effort":0,"status":"FLYING"}}"#;
        assert!(decode_telemetry(bad_status, TOPIC).is_err());
        let missing = r#"{"op":"publish","topic":"/gripper/state","msg":{"effort":0,"status":"IDLE"}}"#;
        assert!(decode_telemetry(missing, TOPIC).is_err());
        assert!(decode_telemetry("not json", TOPIC).is_err());
    }
}
