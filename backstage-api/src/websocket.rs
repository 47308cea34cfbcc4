use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Extension, Path, Query,
    },
    response::{IntoResponse, Response},
};
use backstage_core::{Conversation, Message};
use backstage_messaging::Snapshot;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::auth::verify_token;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    viewer_id: String,
    token: String,
}

#[derive(Serialize)]
struct SnapshotFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    conversation: &'a Conversation,
    messages: &'a [Message],
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<ApiState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    if let Err(e) = verify_token(&query.token, &state.jwt_secret) {
        return e.into_response();
    }

    let snapshot = match state.messaging.snapshot(&conversation_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if !snapshot.conversation.is_participant(&query.viewer_id) {
        return ApiError::BadRequest(format!(
            "{} is not a participant of {}",
            query.viewer_id, conversation_id
        ))
        .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id, query.viewer_id))
}

async fn send_snapshot(sender: &mut SplitSink<WebSocket, WsMessage>, snapshot: &Snapshot) -> bool {
    let frame = SnapshotFrame {
        kind: "snapshot",
        conversation: &snapshot.conversation,
        messages: &snapshot.messages,
    };
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode conversation snapshot: {}", e);
            return true;
        }
    };
    match sender.send(WsMessage::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Failed to send WebSocket message: {}", e);
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, state: ApiState, conversation_id: String, viewer_id: String) {
    tracing::info!("Viewer {} watching conversation {}", viewer_id, conversation_id);

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the initial snapshot so no change falls in between
    let mut changes = match state.messaging.watch(&conversation_id).await {
        Ok(changes) => changes,
        Err(e) => {
            tracing::error!("Failed to subscribe to {}: {}", conversation_id, e);
            return;
        }
    };

    match state.messaging.refresh(&conversation_id, &viewer_id).await {
        Ok(snapshot) => {
            if !send_snapshot(&mut sender, &snapshot).await {
                return;
            }
        }
        Err(e) => {
            tracing::error!("Failed to load {}: {}", conversation_id, e);
            return;
        }
    }

    let messaging = state.messaging.clone();
    let conversation_send = conversation_id.clone();
    let viewer_send = viewer_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            tracing::debug!("Change {:?} on {}", change.kind, conversation_send);
            let snapshot = match messaging.refresh(&conversation_send, &viewer_send).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!("Failed to reload {}: {}", conversation_send, e);
                    continue;
                }
            };
            if !send_snapshot(&mut sender, &snapshot).await {
                return;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(WsMessage::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("Viewer {} left conversation {}", viewer_id, conversation_id);
}
