use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::Json,
};
use backstage_core::{Conversation, ConversationStatus, Message};
use serde::{Deserialize, Serialize};

use super::required;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    #[serde(default)]
    pub participant_id: Option<String>,
}

pub async fn list_conversations(
    Extension(state): Extension<ApiState>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let Query(query) = query?;
    let participant_id = required(query.participant_id, "participantId")?;

    Ok(Json(state.messaging.list_conversations(&participant_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    #[serde(default)]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

pub async fn start_conversation(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<StartConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ApiError> {
    let Json(payload) = payload?;
    let operator_id = required(payload.operator_id, "operatorId")?;
    let client_id = required(payload.client_id, "clientId")?;

    Ok(Json(state.messaging.start_conversation(&operator_id, &client_id).await?))
}

pub async fn get_messages(
    Extension(state): Extension<ApiState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.messaging.load_messages(&conversation_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

pub async fn send_message(
    Extension(state): Extension<ApiState>,
    Path(conversation_id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(payload) = payload?;
    let sender_id = required(payload.sender_id, "senderId")?;
    let text = required(payload.text, "text")?;

    Ok(Json(
        state
            .messaging
            .send_message(&conversation_id, &sender_id, &text)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConversationRequest {
    #[serde(default)]
    pub viewer_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConversationResponse {
    pub success: bool,
    pub unread_cleared: bool,
}

pub async fn open_conversation(
    Extension(state): Extension<ApiState>,
    Path(conversation_id): Path<String>,
    payload: Result<Json<OpenConversationRequest>, JsonRejection>,
) -> Result<Json<OpenConversationResponse>, ApiError> {
    let Json(payload) = payload?;
    let viewer_id = required(payload.viewer_id, "viewerId")?;

    let unread_cleared = state.messaging.open(&conversation_id, &viewer_id).await?;
    Ok(Json(OpenConversationResponse {
        success: true,
        unread_cleared,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ConversationStatus,
}

pub async fn set_status(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<String>,
    payload: Result<Json<SetStatusRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ApiError> {
    let Json(payload) = payload?;
    tracing::info!("{} set {} to {}", actor.subject, conversation_id, payload.status);
    Ok(Json(
        state
            .messaging
            .set_status(&conversation_id, payload.status)
            .await?,
    ))
}
