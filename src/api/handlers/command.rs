//! Command submission over HTTP.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::api::dto::{CommandAckResponse, CommandRequest};
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::{BridgeError, ErrorResponse};

/// `POST /commands`: Submit a gripper command.
///
/// Runs through the same translator as WebSocket commands, scoped to the
/// shared `rest` session, so a retried `id` is acknowledged without a
/// second publish. An `id` already used for a different command is
/// rejected with 400 rather than acknowledged.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidCommand`] for a bad body and
/// [`BridgeError::BusUnavailable`] while the bus link is down.
#[utoipa::path(
    post,
    path = "/api/v1/commands",
    tag = "Gripper",
    summary = "Submit a command",
    description = "Validates the command and publishes it to the device bus.",
    request_body = CommandRequest,
    responses(
        (status = 202, description = "Command accepted", body = CommandAckResponse),
        (status = 400, description = "Invalid command", body = ErrorResponse),
        (status = 503, description = "Device bus unavailable", body = ErrorResponse),
    )
)]
pub async fn submit_command(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, BridgeError> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| BridgeError::invalid("", format!("malformed JSON: {e}")))?;

    let receipt = state
        .translator
        .submit(SessionId::REST, &raw)
        .map_err(|rejection| {
            tracing::debug!(
                ref_id = %rejection.ref_id,
                error = %rejection.error,
                "rest command rejected"
            );
            rejection.error
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CommandAckResponse {
            ref_id: receipt.id,
            duplicate: receipt.duplicate,
        }),
    ))
}

/// Command routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/commands", post(submit_command))
}
