use std::sync::Arc;
use crate::config::Config;
use crate::conversation_store::PgConversationStore;
use crate::db::{DbPool, create_pool as create_db_pool};
use crate::redis::{RedisPool, create_pool as create_redis_pool};
use crate::token_store::PgTokenStore;

/// Connections owned by the hosting process and shared by every service.
#[derive(Clone)]
pub struct BackstageContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
    pub redis_pool: RedisPool,
}

impl BackstageContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db_pool = create_db_pool(&config.database).await?;
        let redis_pool = create_redis_pool(&config.redis).await?;

        Ok(BackstageContext {
            config: Arc::new(config),
            db_pool,
            redis_pool,
        })
    }

    pub fn token_store(&self) -> PgTokenStore {
        PgTokenStore::new(self.db_pool.clone())
    }

    pub fn conversation_store(&self) -> PgConversationStore {
        PgConversationStore::new(self.db_pool.clone())
    }
}
