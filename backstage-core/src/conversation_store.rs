use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{DbConnection, DbPool};
use crate::schema::{backstage_conversation_unread, backstage_conversations, backstage_messages};
use crate::types::{Conversation, ConversationStatus, Message, MessageStatus};

/// Persistence of conversations, their unread counters and messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Returns the thread for the pair, creating it (active, zero unread) if absent.
    async fn get_or_create_conversation(&self, operator_id: &str, client_id: &str) -> Result<Conversation>;

    /// Conversations a participant belongs to, most recent activity first.
    async fn list_conversations(&self, participant_id: &str) -> Result<Vec<Conversation>>;

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<Option<Conversation>>;

    /// Current message list of a conversation, oldest first.
    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Insert a message, refresh the last-message summary and, when
    /// `unread_for` is set, increment that participant's unread counter.
    async fn insert_message(&self, message: &Message, unread_for: Option<&str>) -> Result<()>;

    /// `sent → delivered` for the given ids not authored by `recipient_id`.
    async fn mark_delivered(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64>;

    /// `delivered → read` for the given ids not authored by `recipient_id`.
    async fn mark_read(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64>;

    async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> Result<()>;
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = backstage_conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ConversationRow {
    id: String,
    operator_id: String,
    client_id: String,
    status: String,
    last_message_text: Option<String>,
    last_message_sender: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self, unread: HashMap<String, i64>) -> Result<Conversation> {
        Ok(Conversation {
            status: self.status.parse()?,
            id: self.id,
            operator_id: self.operator_id,
            client_id: self.client_id,
            unread,
            last_message_text: self.last_message_text,
            last_message_sender: self.last_message_sender,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = backstage_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    sender_role: String,
    body: String,
    status: String,
    is_system: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            sender_role: row.sender_role.parse()?,
            status: row.status.parse()?,
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            text: row.body,
            is_system: row.is_system,
            created_at: row.created_at,
        })
    }
}

pub struct PgConversationStore {
    pool: Arc<DbPool>,
}

impl PgConversationStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn unread_maps(
        conn: &mut DbConnection,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        use crate::schema::backstage_conversation_unread::dsl;

        let rows: Vec<(String, String, i64)> = dsl::backstage_conversation_unread
            .filter(dsl::conversation_id.eq_any(ids))
            .select((dsl::conversation_id, dsl::user_id, dsl::unread_count))
            .load(conn)
            .await?;

        let mut maps: HashMap<String, HashMap<String, i64>> = HashMap::new();
        for (conversation_id, user_id, count) in rows {
            maps.entry(conversation_id).or_default().insert(user_id, count);
        }
        Ok(maps)
    }

    async fn load_conversation(conn: &mut DbConnection, id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = backstage_conversations::table
            .find(id)
            .select(ConversationRow::as_select())
            .first(conn)
            .await
            .optional()?;

        match row {
            Some(row) => {
                let mut maps = Self::unread_maps(conn, &[row.id.clone()]).await?;
                let unread = maps.remove(&row.id).unwrap_or_default();
                row.into_conversation(unread).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let mut conn = self.pool.get().await?;
        Self::load_conversation(&mut conn, id).await
    }

    async fn get_or_create_conversation(&self, operator_id: &str, client_id: &str) -> Result<Conversation> {
        let id = Conversation::id_for(operator_id, client_id);
        let mut conn = self.pool.get().await?;

        conn.transaction::<(), diesel::result::Error, _>(|conn| {
            let id = id.clone();
            async move {
                diesel::insert_into(backstage_conversations::table)
                    .values((
                        backstage_conversations::id.eq(&id),
                        backstage_conversations::operator_id.eq(operator_id),
                        backstage_conversations::client_id.eq(client_id),
                        backstage_conversations::status.eq(ConversationStatus::Active.as_str()),
                    ))
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;

                for participant in [operator_id, client_id] {
                    diesel::insert_into(backstage_conversation_unread::table)
                        .values((
                            backstage_conversation_unread::conversation_id.eq(&id),
                            backstage_conversation_unread::user_id.eq(participant),
                            backstage_conversation_unread::unread_count.eq(0i64),
                        ))
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Self::load_conversation(&mut conn, &id)
            .await?
            .ok_or_else(|| anyhow!("conversation {} vanished after creation", id))
    }

    async fn list_conversations(&self, participant_id: &str) -> Result<Vec<Conversation>> {
        use crate::schema::backstage_conversations::dsl;

        let mut conn = self.pool.get().await?;
        let rows: Vec<ConversationRow> = dsl::backstage_conversations
            .filter(dsl::operator_id.eq(participant_id).or(dsl::client_id.eq(participant_id)))
            .order((dsl::last_message_at.desc().nulls_last(), dsl::created_at.desc()))
            .select(ConversationRow::as_select())
            .load(&mut conn)
            .await?;

        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut maps = Self::unread_maps(&mut conn, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let unread = maps.remove(&row.id).unwrap_or_default();
                row.into_conversation(unread)
            })
            .collect()
    }

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<Option<Conversation>> {
        use crate::schema::backstage_conversations::dsl;

        let mut conn = self.pool.get().await?;
        let changed = diesel::update(dsl::backstage_conversations.find(id))
            .set((dsl::status.eq(status.as_str()), dsl::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;

        if changed == 0 {
            return Ok(None);
        }
        Self::load_conversation(&mut conn, id).await
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        use crate::schema::backstage_messages::dsl;

        let mut conn = self.pool.get().await?;
        let rows: Vec<MessageRow> = dsl::backstage_messages
            .filter(dsl::conversation_id.eq(conversation_id))
            .order(dsl::created_at.asc())
            .select(MessageRow::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn insert_message(&self, message: &Message, unread_for: Option<&str>) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<(), diesel::result::Error, _>(|conn| {
            async move {
                diesel::insert_into(backstage_messages::table)
                    .values((
                        backstage_messages::id.eq(&message.id),
                        backstage_messages::conversation_id.eq(&message.conversation_id),
                        backstage_messages::sender_id.eq(&message.sender_id),
                        backstage_messages::sender_role.eq(message.sender_role.as_str()),
                        backstage_messages::body.eq(&message.text),
                        backstage_messages::status.eq(message.status.as_str()),
                        backstage_messages::is_system.eq(message.is_system),
                        backstage_messages::created_at.eq(message.created_at),
                    ))
                    .execute(conn)
                    .await?;

                diesel::update(backstage_conversations::table.find(&message.conversation_id))
                    .set((
                        backstage_conversations::last_message_text.eq(Some(message.text.as_str())),
                        backstage_conversations::last_message_sender.eq(Some(message.sender_id.as_str())),
                        backstage_conversations::last_message_at.eq(Some(message.created_at)),
                        backstage_conversations::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                if let Some(recipient) = unread_for {
                    use crate::schema::backstage_conversation_unread::dsl;

                    diesel::insert_into(dsl::backstage_conversation_unread)
                        .values((
                            dsl::conversation_id.eq(&message.conversation_id),
                            dsl::user_id.eq(recipient),
                            dsl::unread_count.eq(1i64),
                        ))
                        .on_conflict((dsl::conversation_id, dsl::user_id))
                        .do_update()
                        .set(dsl::unread_count.eq(dsl::unread_count + 1i64))
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Ok(())
    }

    async fn mark_delivered(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64> {
        advance_status(
            &self.pool,
            conversation_id,
            recipient_id,
            ids,
            MessageStatus::Sent,
            MessageStatus::Delivered,
        )
        .await
    }

    async fn mark_read(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64> {
        advance_status(
            &self.pool,
            conversation_id,
            recipient_id,
            ids,
            MessageStatus::Delivered,
            MessageStatus::Read,
        )
        .await
    }

    async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        use crate::schema::backstage_conversation_unread::dsl;

        let mut conn = self.pool.get().await?;
        diesel::update(
            dsl::backstage_conversation_unread
                .filter(dsl::conversation_id.eq(conversation_id))
                .filter(dsl::user_id.eq(user_id)),
        )
        .set(dsl::unread_count.eq(0i64))
        .execute(&mut conn)
        .await?;

        Ok(())
    }
}

/// Single guarded update: only rows still at `from` move to `to`, so a stale
/// snapshot can never move a message backwards.
async fn advance_status(
    pool: &DbPool,
    conversation_id: &str,
    recipient_id: &str,
    ids: &[String],
    from: MessageStatus,
    to: MessageStatus,
) -> Result<u64> {
    use crate::schema::backstage_messages::dsl;

    if ids.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get().await?;
    let changed = diesel::update(
        dsl::backstage_messages
            .filter(dsl::conversation_id.eq(conversation_id))
            .filter(dsl::id.eq_any(ids))
            .filter(dsl::sender_id.ne(recipient_id))
            .filter(dsl::is_system.eq(false))
            .filter(dsl::status.eq(from.as_str())),
    )
    .set(dsl::status.eq(to.as_str()))
    .execute(&mut conn)
    .await?;

    Ok(changed as u64)
}
