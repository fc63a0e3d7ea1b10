use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Liveness check.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Product Support API is running" }))
}
