pub mod service_tests;

use crate::memory::{MemoryChangeFeed, MemoryUnreadCache};
use crate::MessagingService;
use backstage_core::memory::InMemoryConversationStore;
use backstage_core::{Message, MessageStatus, SenderRole};
use std::sync::Arc;
use std::time::Duration;

pub const OPERATOR: &str = "op-ada";
pub const CLIENT: &str = "client-bo";

pub struct Harness {
    pub store: Arc<InMemoryConversationStore>,
    pub cache: Arc<MemoryUnreadCache>,
    pub feed: Arc<MemoryChangeFeed>,
    pub service: MessagingService,
}

pub fn harness_with(store: InMemoryConversationStore) -> Harness {
    let store = Arc::new(store);
    let cache = Arc::new(MemoryUnreadCache::new());
    let feed = Arc::new(MemoryChangeFeed::new());
    let service = MessagingService::new(store.clone(), cache.clone(), feed.clone());
    Harness {
        store,
        cache,
        feed,
        service,
    }
}

pub fn harness() -> Harness {
    harness_with(InMemoryConversationStore::new())
}

pub fn client_message(conversation_id: &str, id: &str, status: MessageStatus) -> Message {
    let mut message = Message::new(conversation_id, CLIENT, SenderRole::Client, "Is the venue step-free?");
    message.id = id.to_string();
    message.status = status;
    message
}

/// Polls `done` until it holds or about half a second has passed; spawned
/// store and feed work lands in between.
pub async fn settle<F: FnMut() -> bool>(mut done: F) -> bool {
    for _ in 0..50 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}
