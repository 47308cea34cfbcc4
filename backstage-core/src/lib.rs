pub mod config;
pub mod context;
pub mod conversation_store;
pub mod db;
pub mod error;
pub mod redis;
pub mod schema;
pub mod token;
pub mod token_store;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use config::Config;
pub use context::BackstageContext;
pub use conversation_store::{ConversationStore, PgConversationStore};
pub use db::DbPool;
pub use error::{Error, Result};
pub use self::redis::RedisPool;
pub use token::{classify_token, is_valid_expo_token};
pub use token_store::{PgTokenStore, TokenStore, USER_QUERY_BATCH};
pub use types::{
    Conversation, ConversationStatus, DeactivationBatch, DeviceToken, Message, MessageStatus, Platform,
    SenderRole, TokenFamily, TokenRegistration, ID_SEPARATOR,
};
