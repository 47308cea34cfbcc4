use anyhow::Result;
use async_trait::async_trait;
use backstage_core::RedisPool;

pub fn unread_key(conversation_id: &str, user_id: &str) -> String {
    format!("UNREAD:{}:{}", conversation_id, user_id)
}

/// Fast per-participant unread counters. The conversation store stays the
/// source of truth; the cache is updated optimistically.
#[async_trait]
pub trait UnreadCache: Send + Sync {
    async fn increment(&self, conversation_id: &str, user_id: &str) -> Result<i64>;
    async fn reset(&self, conversation_id: &str, user_id: &str) -> Result<()>;
    async fn get(&self, conversation_id: &str, user_id: &str) -> Result<i64>;
}

pub struct RedisUnreadCache {
    pool: RedisPool,
}

impl RedisUnreadCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnreadCache for RedisUnreadCache {
    async fn increment(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        let mut conn = self.pool.shared();
        let count: i64 = redis::cmd("INCR")
            .arg(unread_key(conversation_id, user_id))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn reset(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.pool.shared();
        let _: () = redis::cmd("SET")
            .arg(unread_key(conversation_id, user_id))
            .arg(0)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        let mut conn = self.pool.shared();
        let count: Option<i64> = redis::cmd("GET")
            .arg(unread_key(conversation_id, user_id))
            .query_async(&mut conn)
            .await?;
        Ok(count.unwrap_or(0))
    }
}
