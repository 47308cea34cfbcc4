use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::Json,
};
use backstage_delivery::Priority;
use backstage_notify::{DispatchStats, NotificationPayload, SendRequest, Target};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::required;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
    #[serde(default)]
    pub tokens: Option<Vec<String>>,
    #[serde(default)]
    pub notification: Option<NotificationBody>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub android: Option<Value>,
    #[serde(default)]
    pub apns: Option<Value>,
}

impl SendNotificationRequest {
    fn into_send_request(self) -> SendRequest {
        let mut targets = Vec::new();
        if let Some(user_id) = self.user_id {
            targets.push(Target::User(user_id));
        }
        if let Some(user_ids) = self.user_ids {
            targets.push(Target::Users(user_ids));
        }
        if let Some(tokens) = self.tokens {
            targets.push(Target::Tokens(tokens));
        }

        let notification = self.notification.unwrap_or_default();
        SendRequest {
            targets,
            notification: NotificationPayload {
                title: notification.title.unwrap_or_default(),
                body: notification.body.unwrap_or_default(),
                image_url: notification.image_url,
                data: notification.data.unwrap_or_default().into_iter().collect(),
            },
            priority: self.priority.unwrap_or_default(),
            android: self.android,
            apns: self.apns,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub success: bool,
    pub stats: DispatchStats,
}

pub async fn send_notification(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<AuthenticatedUser>,
    payload: Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Result<Json<SendNotificationResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = payload.into_send_request();

    let stats = state.dispatcher.dispatch(&request).await?;
    tracing::info!(
        "{} sent \"{}\": {} delivered, {} failed",
        actor.subject,
        request.notification.title,
        stats.total_success,
        stats.total_failure
    );

    Ok(Json(SendNotificationResponse {
        success: stats.total_success > 0,
        stats,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactivateTokensRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactivateTokensResponse {
    pub success: bool,
    pub message: String,
    pub tokens_reactivated: u64,
    pub total_tokens: usize,
}

pub async fn reactivate_tokens(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<AuthenticatedUser>,
    payload: Result<Json<ReactivateTokensRequest>, JsonRejection>,
) -> Result<Json<ReactivateTokensResponse>, ApiError> {
    let Json(payload) = payload?;
    let user_id = required(payload.user_id, "userId")?;

    let summary = state.dispatcher.reactivate(&user_id).await?;
    tracing::info!("{} reactivated tokens of user {}", actor.subject, user_id);

    Ok(Json(ReactivateTokensResponse {
        success: true,
        message: format!(
            "Reactivated {} of {} tokens for user {}",
            summary.reactivated, summary.total, user_id
        ),
        tokens_reactivated: summary.reactivated,
        total_tokens: summary.total,
    }))
}
