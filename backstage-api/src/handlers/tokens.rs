use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::Json,
};
use backstage_core::{Platform, TokenFamily};
use backstage_notify::RegisterToken;
use serde::{Deserialize, Serialize};

use super::required;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceTokenRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    pub platform: Platform,
    #[serde(default)]
    pub token_type: Option<TokenFamily>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceTokenResponse {
    pub success: bool,
    pub token_type: TokenFamily,
}

pub async fn register_device_token(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<RegisterDeviceTokenRequest>, JsonRejection>,
) -> Result<Json<RegisterDeviceTokenResponse>, ApiError> {
    let Json(payload) = payload?;

    let registered = state
        .dispatcher
        .register(RegisterToken {
            user_id: required(payload.user_id, "userId")?,
            device_id: required(payload.device_id, "deviceId")?,
            token: required(payload.token, "token")?,
            platform: payload.platform,
            token_type: payload.token_type,
        })
        .await?;

    Ok(Json(RegisterDeviceTokenResponse {
        success: true,
        token_type: registered.token_type,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableDeviceTokenRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    /// All of the user's devices when absent.
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableDeviceTokenResponse {
    pub success: bool,
    pub tokens_deactivated: u64,
}

pub async fn disable_device_token(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<AuthenticatedUser>,
    payload: Result<Json<DisableDeviceTokenRequest>, JsonRejection>,
) -> Result<Json<DisableDeviceTokenResponse>, ApiError> {
    let Json(payload) = payload?;
    let user_id = required(payload.user_id, "userId")?;

    let changed = state
        .dispatcher
        .disable(&user_id, payload.device_id.as_deref())
        .await?;
    tracing::info!(
        "{} disabled {} token(s) of user {}",
        actor.subject,
        changed,
        user_id
    );

    Ok(Json(DisableDeviceTokenResponse {
        success: true,
        tokens_deactivated: changed,
    }))
}
