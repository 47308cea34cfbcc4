pub mod feed;
pub mod service;
pub mod tracker;
pub mod unread_cache;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use feed::{ChangeFeed, ChangeKind, ChangeReceiver, ConversationChange, RedisChangeFeed};
pub use service::{MessagingService, Snapshot};
pub use tracker::{partition, Partition, StatusTracker, TrackerOutcome};
pub use unread_cache::{RedisUnreadCache, UnreadCache};

#[cfg(test)]
mod tests;
