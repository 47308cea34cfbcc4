//! In-process unread cache and change feed for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::feed::{ChangeFeed, ChangeReceiver, ConversationChange};
use crate::unread_cache::{unread_key, UnreadCache};

#[derive(Default)]
pub struct MemoryUnreadCache {
    counts: Mutex<HashMap<String, i64>>,
    unavailable: Mutex<bool>,
}

impl MemoryUnreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, conversation_id: &str, user_id: &str, count: i64) {
        self.counts
            .lock()
            .unwrap()
            .insert(unread_key(conversation_id, user_id), count);
    }

    /// Make every call fail, as if the cache were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(anyhow!("unread cache unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl UnreadCache for MemoryUnreadCache {
    async fn increment(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        self.check()?;
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(unread_key(conversation_id, user_id)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.check()?;
        self.set(conversation_id, user_id, 0);
        Ok(())
    }

    async fn get(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        self.check()?;
        Ok(self
            .counts
            .lock()
            .unwrap()
            .get(&unread_key(conversation_id, user_id))
            .copied()
            .unwrap_or(0))
    }
}

#[derive(Default)]
pub struct MemoryChangeFeed {
    published: Mutex<Vec<ConversationChange>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<ConversationChange>>>>,
}

impl MemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<ConversationChange> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn publish(&self, change: &ConversationChange) -> Result<()> {
        self.published.lock().unwrap().push(change.clone());
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(&change.conversation_id) {
            senders.retain(|tx| tx.try_send(change.clone()).is_ok() || !tx.is_closed());
        }
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &str) -> Result<ChangeReceiver> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
