//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "gripper-bridge",
        description = "WebSocket and REST bridge to a gripper driver on a pub/sub device bus"
    ),
    paths(
        handlers::system::health_handler,
        handlers::state::get_state,
        handlers::command::submit_command,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        dto::StateResponse,
        dto::CommandRequest,
        dto::CommandParamsDto,
        dto::CommandAckResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::bus::LinkStatus,
        crate::domain::GripperStatus,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Gripper", description = "Gripper state and commands"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
