use axum::{extract::Request, http::header::AUTHORIZATION, response::Response};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ApiError;
use crate::state::ApiState;

/// JWT claims of a console session.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Authenticated console user
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subject: String,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

/// Generate an HS256 token for `subject`.
pub fn generate_token(subject: &str, secret: &str, expires_in_days: u64) -> Result<String, ApiError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .as_secs() as usize;

    let claims = Claims {
        sub: subject.to_string(),
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        ApiError::Internal(e.to_string())
    })
}

/// Verify a token and return its subject.
pub fn verify_token(token: &str, secret: &str) -> Result<String, ApiError> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &Validation::default()) {
        Ok(token_data) => Ok(token_data.claims.sub),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(ApiError::Unauthorized)
        }
    }
}

/// Axum middleware for JWT authentication. The WebSocket route carries its
/// token in the query string and is verified by its handler.
pub async fn auth_middleware(mut req: Request, next: axum::middleware::Next) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws/") {
        return Ok(next.run(req).await);
    }

    let auth_header = req.headers().get(AUTHORIZATION).and_then(|h| h.to_str().ok());
    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("Missing Authorization header");
            return Err(ApiError::Unauthorized);
        }
    };

    let state = req
        .extensions()
        .get::<ApiState>()
        .ok_or_else(|| ApiError::Internal("API state missing from request".into()))?;

    let subject = verify_token(&token, &state.jwt_secret)?;
    tracing::debug!("Authenticated user: {}", subject);
    req.extensions_mut().insert(AuthenticatedUser { subject });

    Ok(next.run(req).await)
}
