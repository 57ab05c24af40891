//! Gripper state DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{GripperState, GripperStatus};

/// Current gripper state, in the same shape as the WebSocket state frame
/// minus the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StateResponse {
    /// Bridge-assigned sequence number (0 before the first telemetry).
    pub sequence: u64,
    /// Normalized position in `[0, 1]`.
    pub position: f64,
    /// Applied force/torque proxy.
    pub effort: f64,
    /// Driver status.
    pub status: GripperStatus,
    /// Bus-side timestamp in seconds.
    pub timestamp: f64,
}

impl From<&GripperState> for StateResponse {
    fn from(state: &GripperState) -> Self {
        Self {
            sequence: state.sequence,
            position: state.position,
            effort: state.effort,
            status: state.status,
            timestamp: state.timestamp,
        }
    }
}
