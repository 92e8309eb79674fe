//! Axum Router Configuration
//!
//! HTTP routing for the documentation API, the voice relay endpoint, and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{DocResult, ErrorResponse, TransformPayload, TransformResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::transform_api_docs),
    components(schemas(TransformPayload, TransformResponse, DocResult, ErrorResponse)),
    tags(
        (name = "docweaver API", description = "Audience-tailored API documentation and a realtime voice relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/transform-api-docs", post(handlers::transform_api_docs))
        .route("/realtime-voice", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
