//! Request and response bodies of the HTTP API, documented with `utoipa`.

use docweaver_core::docs::GeneratedDoc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TransformPayload {
    /// Any JSON API description (OpenAPI, Postman collection, ...).
    #[schema(value_type = Object)]
    pub api_json: serde_json::Value,
    /// `beginner`, `security` or `integration`. Anything else means `beginner`.
    #[schema(example = "beginner")]
    pub audience: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct DocResult {
    #[schema(example = "Quick Start Guide")]
    pub format: String,
    pub content: String,
}

impl From<GeneratedDoc> for DocResult {
    fn from(doc: GeneratedDoc) -> Self {
        Self {
            format: doc.format.title().to_string(),
            content: doc.content,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TransformResponse {
    pub results: Vec<DocResult>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
