use backstage_core::{
    Conversation, ConversationStatus, ConversationStore, Error, Message, Result, SenderRole,
    ID_SEPARATOR,
};
use backstage_notify::{Dispatcher, NotificationPayload, SendRequest, Target};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::feed::{publish_change, ChangeFeed, ChangeKind, ChangeReceiver};
use crate::tracker::StatusTracker;
use crate::unread_cache::UnreadCache;

const PUSH_PREVIEW_CHARS: usize = 140;

/// Conversation snapshot as seen by one viewer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn UnreadCache>,
    feed: Arc<dyn ChangeFeed>,
    tracker: StatusTracker,
    notifier: Option<Dispatcher>,
}

impl MessagingService {
    pub fn new(store: Arc<dyn ConversationStore>, cache: Arc<dyn UnreadCache>, feed: Arc<dyn ChangeFeed>) -> Self {
        let tracker = StatusTracker::new(store.clone(), cache.clone(), feed.clone());
        Self {
            store,
            cache,
            feed,
            tracker,
            notifier: None,
        }
    }

    /// Push a notification to the recipient of every new message.
    pub fn with_notifier(mut self, dispatcher: Dispatcher) -> Self {
        self.notifier = Some(dispatcher);
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub async fn start_conversation(&self, operator_id: &str, client_id: &str) -> Result<Conversation> {
        if operator_id.trim().is_empty() || client_id.trim().is_empty() {
            return Err(Error::Validation("operatorId and clientId are required".into()));
        }
        if operator_id == client_id {
            return Err(Error::Validation("a conversation needs two distinct participants".into()));
        }
        if operator_id.contains(ID_SEPARATOR) || client_id.contains(ID_SEPARATOR) {
            return Err(Error::Validation(format!(
                "participant ids cannot contain '{}'",
                ID_SEPARATOR
            )));
        }

        let conversation = self.store.get_or_create_conversation(operator_id, client_id).await?;
        tracing::info!("Conversation {} ready", conversation.id);
        Ok(conversation)
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Conversation {}", conversation_id)))
    }

    pub async fn list_conversations(&self, participant_id: &str) -> Result<Vec<Conversation>> {
        if participant_id.trim().is_empty() {
            return Err(Error::Validation("participantId is required".into()));
        }
        Ok(self.store.list_conversations(participant_id).await?)
    }

    pub async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.conversation(conversation_id).await?;
        Ok(self.store.load_messages(conversation_id).await?)
    }

    pub async fn snapshot(&self, conversation_id: &str) -> Result<Snapshot> {
        let conversation = self.conversation(conversation_id).await?;
        let messages = self.store.load_messages(conversation_id).await?;
        Ok(Snapshot {
            conversation,
            messages,
        })
    }

    pub async fn send_message(&self, conversation_id: &str, sender_id: &str, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(Error::Validation("text is required".into()));
        }

        let conversation = self.conversation(conversation_id).await?;
        let recipient = conversation
            .counterpart(sender_id)
            .ok_or_else(|| Error::Validation(format!("{} is not a participant of {}", sender_id, conversation_id)))?
            .to_string();
        if conversation.status == ConversationStatus::Closed {
            return Err(Error::Conflict(format!("Conversation {} is closed", conversation_id)));
        }

        let role = if sender_id == conversation.operator_id {
            SenderRole::Operator
        } else {
            SenderRole::Client
        };
        let message = Message::new(conversation_id, sender_id, role, text);
        self.store.insert_message(&message, Some(&recipient)).await?;

        if let Err(e) = self.cache.increment(conversation_id, &recipient).await {
            tracing::warn!("Failed to bump cached unread count in {}: {}", conversation_id, e);
        }
        self.publish(conversation_id, ChangeKind::MessageCreated, Some(&message.id)).await;
        self.notify_recipient(&recipient, &message);

        tracing::debug!("Message {} stored in {}", message.id, conversation_id);
        Ok(message)
    }

    /// Closing or reopening appends a system message to the thread.
    pub async fn set_status(&self, conversation_id: &str, status: ConversationStatus) -> Result<Conversation> {
        let current = self.conversation(conversation_id).await?;
        if current.status == status {
            return Ok(current);
        }

        let updated = self
            .store
            .set_status(conversation_id, status)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Conversation {}", conversation_id)))?;

        let notice = match (current.status, status) {
            (_, ConversationStatus::Closed) => Some("Conversation closed"),
            (ConversationStatus::Closed, ConversationStatus::Active) => Some("Conversation reopened"),
            _ => None,
        };
        if let Some(text) = notice {
            let message = Message::system(conversation_id, text);
            self.store.insert_message(&message, None).await?;
        }

        tracing::info!("Conversation {} is now {}", conversation_id, status);
        self.publish(conversation_id, ChangeKind::StatusChanged, None).await;
        Ok(updated)
    }

    async fn participant_snapshot(&self, conversation_id: &str, viewer_id: &str) -> Result<Snapshot> {
        let snapshot = self.snapshot(conversation_id).await?;
        if !snapshot.conversation.is_participant(viewer_id) {
            return Err(Error::Validation(format!(
                "{} is not a participant of {}",
                viewer_id, conversation_id
            )));
        }
        Ok(snapshot)
    }

    /// Clears the viewer's unread counter and schedules the status reconcile
    /// for `snapshot`. Returns whether anything was unread.
    async fn advance_for_viewer(&self, snapshot: &Snapshot, viewer_id: &str) -> bool {
        let cleared = self
            .tracker
            .open_conversation(&snapshot.conversation, viewer_id)
            .await
            .is_some();
        self.tracker.spawn_reconcile(
            snapshot.conversation.id.clone(),
            viewer_id.to_string(),
            snapshot.messages.clone(),
        );
        cleared
    }

    /// Viewer opens a conversation: clear their unread counter and advance the
    /// statuses of the messages they received. Returns whether anything was unread.
    pub async fn open(&self, conversation_id: &str, viewer_id: &str) -> Result<bool> {
        let snapshot = self.participant_snapshot(conversation_id, viewer_id).await?;
        Ok(self.advance_for_viewer(&snapshot, viewer_id).await)
    }

    /// One step of a live watch: load the snapshot to show the viewer, then
    /// treat it as seen. Messages that arrive while the viewer is watching are
    /// read and their unread count is cleared, exactly as on open.
    pub async fn refresh(&self, conversation_id: &str, viewer_id: &str) -> Result<Snapshot> {
        let snapshot = self.participant_snapshot(conversation_id, viewer_id).await?;
        self.advance_for_viewer(&snapshot, viewer_id).await;
        Ok(snapshot)
    }

    pub async fn watch(&self, conversation_id: &str) -> Result<ChangeReceiver> {
        Ok(self.feed.subscribe(conversation_id).await?)
    }

    async fn publish(&self, conversation_id: &str, kind: ChangeKind, message_id: Option<&str>) {
        publish_change(self.feed.as_ref(), conversation_id, kind, message_id).await;
    }

    fn notify_recipient(&self, recipient: &str, message: &Message) {
        let Some(dispatcher) = self.notifier.clone() else {
            return;
        };

        let body: String = message.text.chars().take(PUSH_PREVIEW_CHARS).collect();
        let data = BTreeMap::from([
            ("conversationId".to_string(), Value::String(message.conversation_id.clone())),
            ("messageId".to_string(), Value::String(message.id.clone())),
        ]);
        let request = SendRequest::new(
            vec![Target::User(recipient.to_string())],
            NotificationPayload {
                title: "New message".to_string(),
                body,
                image_url: None,
                data,
            },
        );
        let recipient = recipient.to_string();

        tokio::spawn(async move {
            match dispatcher.dispatch(&request).await {
                Ok(stats) => tracing::debug!(
                    "Message push to {}: {} succeeded, {} failed",
                    recipient,
                    stats.total_success,
                    stats.total_failure
                ),
                Err(e) => tracing::debug!("No message push for {}: {}", recipient, e),
            }
        });
    }
}
