//! Immutable gripper state snapshots.
//!
//! A [`GripperState`] is produced once per accepted telemetry message (or
//! derived by the bus client during an outage) and is never mutated
//! afterwards. Snapshots are shared as `Arc<GripperState>` between the
//! state cache and every session queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Operating status reported by the gripper driver.
///
/// `Unknown` is never reported by the driver; it only marks the sentinel
/// snapshot served before the first telemetry message arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GripperStatus {
    /// No telemetry received yet.
    Unknown,
    /// Fingers at rest.
    Idle,
    /// A motion command is in progress.
    Moving,
    /// Holding an object.
    Gripping,
    /// Driver fault, or the bridge lost the device bus.
    Error,
}

impl GripperStatus {
    /// Returns the wire representation (`"IDLE"`, `"MOVING"`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Idle => "IDLE",
            Self::Moving => "MOVING",
            Self::Gripping => "GRIPPING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for GripperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GripperStatus {
    type Err = String;

    /// Parses a driver status string, ignoring case. `UNKNOWN` is not a
    /// valid driver status.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "MOVING" => Ok(Self::Moving),
            "GRIPPING" => Ok(Self::Gripping),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unrecognized gripper status: {other}")),
        }
    }
}

/// Last-known gripper state as seen on the device bus.
///
/// `sequence` is assigned by the bus client and strictly increases for
/// the lifetime of the process; consumers discard any snapshot whose
/// sequence is not greater than the last one they applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GripperState {
    /// Normalized finger opening in `[0.0, 1.0]`.
    pub position: f64,
    /// Applied force/torque proxy as reported by the driver.
    pub effort: f64,
    /// Driver status.
    pub status: GripperStatus,
    /// Bus-side timestamp in seconds.
    pub timestamp: f64,
    /// Bridge-assigned sequence number.
    pub sequence: u64,
}

impl GripperState {
    /// The sentinel returned before any telemetry has been applied.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            position: 0.0,
            effort: 0.0,
            status: GripperStatus::Unknown,
            timestamp: 0.0,
            sequence: 0,
        }
    }

    /// Returns `true` for the pre-telemetry sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.sequence == 0
    }

    /// Builds the state broadcast while the device bus is unreachable:
    /// the last known readings with `status: ERROR` and a fresh sequence.
    #[must_use]
    pub fn derived_error(last: Option<&Self>, sequence: u64) -> Self {
        let (position, effort, timestamp) =
            last.map_or((0.0, 0.0, 0.0), |s| (s.position, s.effort, s.timestamp));
        Self {
            position,
            effort,
            status: GripperStatus::Error,
            timestamp,
            sequence,
        }
    }
}

impl Default for GripperState {
    fn default() -> Self {
        Self::unknown()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("moving".parse::<GripperStatus>(), Ok(GripperStatus::Moving));
        assert_eq!("GRIPPING".parse::<GripperStatus>(), Ok(GripperStatus::Gripping));
        assert!("unknown".parse::<GripperStatus>().is_err());
        assert!("spinning".parse::<GripperStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&GripperStatus::Idle).unwrap_or_default();
        assert_eq!(json, "\"IDLE\"");
    }

    #[test]
    fn sentinel_is_unknown() {
        let s = GripperState::unknown();
        assert!(s.is_unknown());
        assert_eq!(s.status, GripperStatus::Unknown);
    }

    #[test]
    fn derived_error_keeps_last_readings() {
        let last = GripperState {
            position: 0.4,
            effort: 2.0,
            status: GripperStatus::Gripping,
            timestamp: 12.5,
            sequence: 7,
        };
        let derived = GripperState::derived_error(Some(&last), 8);
        assert_eq!(derived.status, GripperStatus::Error);
        assert_eq!(derived.sequence, 8);
        assert!((derived.position - 0.4).abs() < f64::EPSILON);
        assert!((derived.timestamp - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn derived_error_without_history() {
        let derived = GripperState::derived_error(None, 1);
        assert_eq!(derived.status, GripperStatus::Error);
        assert!(!derived.is_unknown());
    }
}
