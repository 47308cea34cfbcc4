pub mod conversations;
pub mod notifications;
pub mod tokens;

use axum::response::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "backstage-api"
    }))
}

/// A required string field: present and not blank.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, crate::error::ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(crate::error::ApiError::BadRequest(format!("{} is required", field))),
    }
}
