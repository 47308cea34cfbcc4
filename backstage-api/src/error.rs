use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use backstage_notify::DispatchError;
use thiserror::Error;

/// Every handler error; rendered as `{ "error": message }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => {
                tracing::error!("Request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Validation(message) => ApiError::BadRequest(message),
            error @ DispatchError::NoTargets => ApiError::NotFound(error.to_string()),
            DispatchError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            DispatchError::Store(e) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

impl From<backstage_core::Error> for ApiError {
    fn from(error: backstage_core::Error) -> Self {
        match error {
            backstage_core::Error::Validation(message) => ApiError::BadRequest(message),
            backstage_core::Error::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            backstage_core::Error::Conflict(message) => ApiError::Conflict(message),
            backstage_core::Error::Store(e) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(DispatchError::NoTargets).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DispatchError::Validation("bad".into())).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(backstage_core::Error::Conflict("closed".into())).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DispatchError::Store(anyhow::anyhow!("db down"))).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
