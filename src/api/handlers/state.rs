//! Gripper state endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::StateResponse;
use crate::app_state::AppState;

/// `GET /state`: Current gripper state.
#[utoipa::path(
    get,
    path = "/api/v1/state",
    tag = "Gripper",
    summary = "Current gripper state",
    description = "Returns the last known gripper state. Before the first telemetry message the status is UNKNOWN with sequence 0.",
    responses(
        (status = 200, description = "Current snapshot", body = StateResponse),
    )
)]
pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse::from(state.cache.read().as_ref()))
}

/// State routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/state", get(get_state))
}
