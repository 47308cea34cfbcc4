use anyhow::Result;
use async_trait::async_trait;
use backstage_core::RedisPool;
use redis::streams::StreamReadReply;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const STREAM_MAX_LEN: usize = 1000;
const READ_BLOCK_MS: usize = 1000;
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MessageCreated,
    StatusChanged,
    /// Delivery or read state of existing messages advanced.
    MessagesUpdated,
    /// A participant's unread counter was cleared.
    UnreadCleared,
}

/// Notice that a conversation changed; watchers reload their snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationChange {
    pub conversation_id: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub message_id: Option<String>,
}

pub type ChangeReceiver = mpsc::Receiver<ConversationChange>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn publish(&self, change: &ConversationChange) -> Result<()>;

    /// Changes published after this call. The subscription ends when the
    /// receiver is dropped.
    async fn subscribe(&self, conversation_id: &str) -> Result<ChangeReceiver>;
}

/// Publish failures are logged, never returned: the mutation they describe
/// has already been committed.
pub(crate) async fn publish_change(
    feed: &dyn ChangeFeed,
    conversation_id: &str,
    kind: ChangeKind,
    message_id: Option<&str>,
) {
    let change = ConversationChange {
        conversation_id: conversation_id.to_string(),
        kind,
        message_id: message_id.map(str::to_string),
    };
    if let Err(e) = feed.publish(&change).await {
        tracing::warn!("Failed to publish {:?} for {}: {}", kind, conversation_id, e);
    }
}

pub fn stream_key(conversation_id: &str) -> String {
    format!("STREAM:CONV:{}", conversation_id)
}

/// Change feed on Redis streams, one stream per conversation.
pub struct RedisChangeFeed {
    pool: RedisPool,
}

impl RedisChangeFeed {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn publish(&self, change: &ConversationChange) -> Result<()> {
        let payload = serde_json::to_string(change)?;
        let mut conn = self.pool.shared();
        let _: String = redis::cmd("XADD")
            .arg(stream_key(&change.conversation_id))
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg("data")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &str) -> Result<ChangeReceiver> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let pool = self.pool.clone();
        let key = stream_key(conversation_id);

        // Fail fast if Redis is unreachable
        let mut conn = pool.dedicated().await?;

        tokio::spawn(async move {
            let mut last_id = "$".to_string();

            while !tx.is_closed() {
                let reply: Result<Option<StreamReadReply>, redis::RedisError> = redis::cmd("XREAD")
                    .arg("BLOCK")
                    .arg(READ_BLOCK_MS)
                    .arg("STREAMS")
                    .arg(&key)
                    .arg(&last_id)
                    .query_async(&mut conn)
                    .await;

                let reply = match reply {
                    Ok(Some(reply)) => reply,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!("Redis stream read error on {}: {}", key, e);
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                        match pool.dedicated().await {
                            Ok(fresh) => conn = fresh,
                            Err(e) => tracing::warn!("Redis reconnect for {} failed: {}", key, e),
                        }
                        continue;
                    }
                };

                for entry in reply.keys.into_iter().flat_map(|stream| stream.ids) {
                    last_id = entry.id.clone();
                    let Some(data) = entry.get::<String>("data") else {
                        continue;
                    };
                    match serde_json::from_str::<ConversationChange>(&data) {
                        Ok(change) => {
                            if tx.send(change).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => tracing::warn!("Skipping malformed change on {}: {}", key, e),
                    }
                }
            }

            tracing::debug!("Change subscription on {} closed", key);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_wire_format() {
        let change = ConversationChange {
            conversation_id: "op-1:client-7".into(),
            kind: ChangeKind::MessageCreated,
            message_id: Some("m-1".into()),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "conversationId": "op-1:client-7", "kind": "message_created", "messageId": "m-1" })
        );
        assert_eq!(stream_key("op-1:client-7"), "STREAM:CONV:op-1:client-7");
    }

    #[test]
    fn test_status_kinds_on_the_wire() {
        let updated: ConversationChange =
            serde_json::from_str(r#"{"conversationId":"c","kind":"messages_updated"}"#).unwrap();
        assert_eq!(updated.kind, ChangeKind::MessagesUpdated);
        assert!(updated.message_id.is_none());
        assert_eq!(serde_json::to_value(ChangeKind::UnreadCleared).unwrap(), "unread_cleared");
    }
}
