//! In-memory [`TokenStore`] and [`ConversationStore`] used by tests.
//!
//! Both record the calls they receive so tests can assert on query fan-in
//! and on the order of status updates.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::conversation_store::ConversationStore;
use crate::token_store::TokenStore;
use crate::types::{
    Conversation, ConversationStatus, DeactivationBatch, DeviceToken, Message, MessageStatus, Platform,
    TokenFamily, TokenRegistration,
};

#[derive(Default)]
struct TokenState {
    users: HashMap<String, Vec<DeviceToken>>,
    lookups: Vec<Vec<String>>,
    unreadable: HashSet<String>,
    deactivations: Vec<DeactivationBatch>,
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    state: Mutex<TokenState>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.users.entry(user_id.to_string()).or_default();
    }

    pub fn add_token(&self, user_id: &str, device_id: &str, token: &str, token_type: TokenFamily) {
        let now = Utc::now();
        let platform = match token_type {
            TokenFamily::Expo => Platform::Ios,
            TokenFamily::Fcm => Platform::Android,
        };
        let mut state = self.state.lock().unwrap();
        state.users.entry(user_id.to_string()).or_default().push(DeviceToken {
            token: token.to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            platform,
            token_type,
            is_active: true,
            created_at: now,
            updated_at: now,
        });
    }

    pub fn set_active(&self, user_id: &str, token: &str, active: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(tokens) = state.users.get_mut(user_id) {
            for entry in tokens.iter_mut().filter(|t| t.token == token) {
                entry.is_active = active;
            }
        }
    }

    /// Make `user_tokens` fail for this user.
    pub fn fail_reads_for(&self, user_id: &str) {
        self.state.lock().unwrap().unreadable.insert(user_id.to_string());
    }

    pub fn is_active(&self, user_id: &str, token: &str) -> Option<bool> {
        let state = self.state.lock().unwrap();
        state
            .users
            .get(user_id)?
            .iter()
            .find(|t| t.token == token)
            .map(|t| t.is_active)
    }

    /// User-id batches passed to `active_tokens_for_users`, in call order.
    pub fn lookups(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().lookups.clone()
    }

    pub fn deactivations(&self) -> Vec<DeactivationBatch> {
        self.state.lock().unwrap().deactivations.clone()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn active_tokens_for_users(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>> {
        let mut state = self.state.lock().unwrap();
        state.lookups.push(user_ids.to_vec());
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .flat_map(|tokens| tokens.iter().filter(|t| t.is_active).cloned())
            .collect())
    }

    async fn user_tokens(&self, user_id: &str) -> Result<Option<Vec<DeviceToken>>> {
        let state = self.state.lock().unwrap();
        if state.unreadable.contains(user_id) {
            return Err(anyhow!("read failed for user {}", user_id));
        }
        Ok(state.users.get(user_id).cloned())
    }

    async fn deactivate(&self, batch: &DeactivationBatch) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.deactivations.push(batch.clone());
        let mut changed = 0;
        for (user_id, tokens) in &batch.by_owner {
            if let Some(entries) = state.users.get_mut(user_id) {
                for entry in entries.iter_mut().filter(|e| e.is_active && tokens.contains(&e.token)) {
                    entry.is_active = false;
                    changed += 1;
                }
            }
        }
        for entries in state.users.values_mut() {
            for entry in entries.iter_mut().filter(|e| e.is_active && batch.unowned.contains(&e.token)) {
                entry.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn reactivate_all(&self, user_id: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        if let Some(entries) = state.users.get_mut(user_id) {
            for entry in entries.iter_mut().filter(|e| !e.is_active) {
                entry.is_active = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn register(&self, registration: &TokenRegistration) -> Result<DeviceToken> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let entries = state.users.entry(registration.user_id.clone()).or_default();
        let token = DeviceToken {
            token: registration.token.clone(),
            user_id: registration.user_id.clone(),
            device_id: registration.device_id.clone(),
            platform: registration.platform,
            token_type: registration.token_type,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        match entries.iter_mut().find(|e| e.device_id == registration.device_id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = DeviceToken { created_at, ..token.clone() };
            }
            None => entries.push(token.clone()),
        }
        Ok(token)
    }

    async fn disable(&self, user_id: &str, device_id: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        if let Some(entries) = state.users.get_mut(user_id) {
            for entry in entries
                .iter_mut()
                .filter(|e| e.is_active && device_id.map_or(true, |d| e.device_id == d))
            {
                entry.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// A status mutation observed by [`InMemoryConversationStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    MarkDeliveredStarted(Vec<String>),
    MarkDeliveredFinished(Vec<String>),
    MarkRead(Vec<String>),
    ResetUnread(String),
}

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
    calls: Vec<StoreCall>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    state: Mutex<ConversationState>,
    delivered_delay: Option<Duration>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `mark_delivered` call, to expose ordering bugs.
    pub fn with_delivered_delay(delay: Duration) -> Self {
        Self {
            delivered_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert_raw_message(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        state
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub fn set_unread(&self, conversation_id: &str, user_id: &str, count: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            conversation.unread.insert(user_id.to_string(), count);
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn message(&self, conversation_id: &str, id: &str) -> Option<Message> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .get(conversation_id)?
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn advance(
        &self,
        conversation_id: &str,
        recipient_id: &str,
        ids: &[String],
        from: MessageStatus,
        to: MessageStatus,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        if let Some(messages) = state.messages.get_mut(conversation_id) {
            for message in messages.iter_mut().filter(|m| {
                ids.contains(&m.id) && m.sender_id != recipient_id && !m.is_system && m.status == from
            }) {
                message.status = to;
                changed += 1;
            }
        }
        changed
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.state.lock().unwrap().conversations.get(id).cloned())
    }

    async fn get_or_create_conversation(&self, operator_id: &str, client_id: &str) -> Result<Conversation> {
        let id = Conversation::id_for(operator_id, client_id);
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let conversation = state.conversations.entry(id.clone()).or_insert_with(|| Conversation {
            id,
            operator_id: operator_id.to_string(),
            client_id: client_id.to_string(),
            status: ConversationStatus::Active,
            unread: HashMap::from([(operator_id.to_string(), 0), (client_id.to_string(), 0)]),
            last_message_text: None,
            last_message_sender: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(conversation.clone())
    }

    async fn list_conversations(&self, participant_id: &str) -> Result<Vec<Conversation>> {
        let state = self.state.lock().unwrap();
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_participant(participant_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<Option<Conversation>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.conversations.get_mut(id).map(|conversation| {
            conversation.status = status;
            conversation.updated_at = Utc::now();
            conversation.clone()
        }))
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn insert_message(&self, message: &Message, unread_for: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| anyhow!("unknown conversation {}", message.conversation_id))?;
        conversation.last_message_text = Some(message.text.clone());
        conversation.last_message_sender = Some(message.sender_id.clone());
        conversation.last_message_at = Some(message.created_at);
        if let Some(recipient) = unread_for {
            *conversation.unread.entry(recipient.to_string()).or_insert(0) += 1;
        }
        state
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn mark_delivered(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StoreCall::MarkDeliveredStarted(ids.to_vec()));
        if let Some(delay) = self.delivered_delay {
            tokio::time::sleep(delay).await;
        }
        let changed = self.advance(conversation_id, recipient_id, ids, MessageStatus::Sent, MessageStatus::Delivered);
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StoreCall::MarkDeliveredFinished(ids.to_vec()));
        Ok(changed)
    }

    async fn mark_read(&self, conversation_id: &str, recipient_id: &str, ids: &[String]) -> Result<u64> {
        self.state.lock().unwrap().calls.push(StoreCall::MarkRead(ids.to_vec()));
        Ok(self.advance(conversation_id, recipient_id, ids, MessageStatus::Delivered, MessageStatus::Read))
    }

    async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::ResetUnread(user_id.to_string()));
        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            conversation.unread.insert(user_id.to_string(), 0);
        }
        Ok(())
    }
}
