//! Command submission DTOs.
//!
//! The request types document the body for OpenAPI; the handler itself
//! validates the raw JSON through the command translator so REST and
//! WebSocket clients get identical error reasons.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind-dependent command parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CommandParamsDto {
    /// Target position in `[0, 1]`, required for `SET_POSITION`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

/// A gripper command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandRequest {
    /// Client-generated correlation token.
    pub id: String,
    /// One of `OPEN`, `CLOSE`, `SET_POSITION`, `STOP`.
    pub kind: String,
    /// Parameters; only `SET_POSITION` takes any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<CommandParamsDto>,
}

/// Acknowledgement of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CommandAckResponse {
    /// The command's `id`.
    #[serde(rename = "refId")]
    pub ref_id: String,
    /// `true` if this id was already published and was not sent again.
    pub duplicate: bool,
}
