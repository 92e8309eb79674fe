//! Axum Handlers for the REST API
//!
//! Documentation generation. The voice relay lives in [`crate::ws`].

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use docweaver_core::{docs::Audience, generator::GenerationError};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{DocResult, ErrorResponse, TransformPayload, TransformResponse},
    state::AppState,
};

pub const MISSING_GATEWAY_KEY: &str = "AI_GATEWAY_API_KEY is not configured";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    MissingGatewayKey,
    Generation(GenerationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::MissingGatewayKey => {
                error!("{}", MISSING_GATEWAY_KEY);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    MISSING_GATEWAY_KEY.to_string(),
                )
            }
            ApiError::Generation(err) => {
                let status = match &err {
                    GenerationError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    GenerationError::QuotaExhausted => StatusCode::PAYMENT_REQUIRED,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = ?err, "Documentation generation failed");
                } else {
                    warn!(error = %err, "AI gateway refused the request");
                }
                let message = match err {
                    GenerationError::RateLimited | GenerationError::QuotaExhausted => {
                        err.to_string()
                    }
                    _ => "Failed to generate documentation".to_string(),
                };
                (status, message)
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err)
    }
}

/// Transform an API description into three audience-tailored documents.
#[utoipa::path(
    post,
    path = "/transform-api-docs",
    request_body = TransformPayload,
    responses(
        (status = 200, description = "Documentation generated", body = TransformResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 402, description = "AI usage limit reached", body = ErrorResponse),
        (status = 429, description = "AI gateway rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Generation failed or gateway not configured", body = ErrorResponse)
    )
)]
pub async fn transform_api_docs(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransformPayload>, JsonRejection>,
) -> Result<Json<TransformResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let docs = state.docs.as_ref().ok_or(ApiError::MissingGatewayKey)?;

    let audience = Audience::from_tag(payload.audience.as_deref());
    let generated = docs.transform(&payload.api_json, audience).await?;
    info!(
        audience = audience.as_str(),
        count = generated.len(),
        "Documentation generated"
    );

    Ok(Json(TransformResponse {
        results: generated.into_iter().map(DocResult::from).collect(),
    }))
}
