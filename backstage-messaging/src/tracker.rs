use anyhow::Result;
use backstage_core::{Conversation, ConversationStore, Message, MessageStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::feed::{publish_change, ChangeFeed, ChangeKind};
use crate::unread_cache::UnreadCache;

/// Message ids of a snapshot that still need a status update for one viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Still `sent`.
    pub pending_delivery: Vec<String>,
    /// `sent` or `delivered`.
    pub pending_read: Vec<String>,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.pending_delivery.is_empty() && self.pending_read.is_empty()
    }
}

/// Considers only messages the viewer received; system messages and the
/// viewer's own messages never change status here.
pub fn partition(messages: &[Message], viewer_id: &str) -> Partition {
    let mut result = Partition::default();
    for message in messages
        .iter()
        .filter(|m| !m.is_system && m.sender_id != viewer_id)
    {
        match message.status {
            MessageStatus::Sent => {
                result.pending_delivery.push(message.id.clone());
                result.pending_read.push(message.id.clone());
            }
            MessageStatus::Delivered => result.pending_read.push(message.id.clone()),
            MessageStatus::Read => {}
        }
    }
    result
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerOutcome {
    pub delivered: u64,
    pub read: u64,
}

impl TrackerOutcome {
    pub fn changed(&self) -> bool {
        self.delivered > 0 || self.read > 0
    }
}

/// Advances message statuses as a viewer watches a conversation. Every
/// update that changes rows is announced on the change feed so the other
/// participant sees its receipts. A reconcile of an unchanged snapshot writes
/// and publishes nothing, which keeps a watcher from looping on its own echo.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn UnreadCache>,
    feed: Arc<dyn ChangeFeed>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn ConversationStore>, cache: Arc<dyn UnreadCache>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self { store, cache, feed }
    }

    /// Marks pending messages delivered, then read. The read update is only
    /// issued once the delivered update has completed.
    pub async fn reconcile_snapshot(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        messages: &[Message],
    ) -> Result<TrackerOutcome> {
        let pending = partition(messages, viewer_id);
        let mut outcome = TrackerOutcome::default();

        if !pending.pending_delivery.is_empty() {
            outcome.delivered = self
                .store
                .mark_delivered(conversation_id, viewer_id, &pending.pending_delivery)
                .await?;
        }
        if !pending.pending_read.is_empty() {
            outcome.read = self
                .store
                .mark_read(conversation_id, viewer_id, &pending.pending_read)
                .await?;
        }

        if outcome.changed() {
            tracing::debug!(
                "Conversation {}: {} delivered, {} read for {}",
                conversation_id,
                outcome.delivered,
                outcome.read,
                viewer_id
            );
            publish_change(self.feed.as_ref(), conversation_id, ChangeKind::MessagesUpdated, None).await;
        }
        Ok(outcome)
    }

    pub fn spawn_reconcile(
        &self,
        conversation_id: String,
        viewer_id: String,
        messages: Vec<Message>,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker
                .reconcile_snapshot(&conversation_id, &viewer_id, &messages)
                .await
            {
                tracing::error!(
                    "Failed to update message status in {} for {}: {}",
                    conversation_id,
                    viewer_id,
                    e
                );
            }
        })
    }

    /// Clears the viewer's unread counter if it is non-zero: the cache is
    /// reset right away and the store reset runs as its own task, whose
    /// handle is returned.
    pub async fn open_conversation(&self, conversation: &Conversation, viewer_id: &str) -> Option<JoinHandle<()>> {
        if conversation.unread_for(viewer_id) <= 0 {
            return None;
        }

        let store = self.store.clone();
        let feed = self.feed.clone();
        let conversation_id = conversation.id.clone();
        let user_id = viewer_id.to_string();
        let handle = tokio::spawn(async move {
            match store.reset_unread(&conversation_id, &user_id).await {
                Ok(()) => publish_change(feed.as_ref(), &conversation_id, ChangeKind::UnreadCleared, None).await,
                Err(e) => {
                    tracing::error!("Failed to reset unread count in {} for {}: {}", conversation_id, user_id, e)
                }
            }
        });

        if let Err(e) = self.cache.reset(&conversation.id, viewer_id).await {
            tracing::warn!("Failed to reset cached unread count in {}: {}", conversation.id, e);
        }

        Some(handle)
    }
}
