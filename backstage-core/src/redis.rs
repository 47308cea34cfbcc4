use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;

use crate::config::{redact_url, RedisConfig};

/// Shared handle to Redis. Short commands go through one auto-reconnecting
/// [`ConnectionManager`]; blocking reads take a dedicated connection so they
/// never stall other callers.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    shared: ConnectionManager,
}

impl RedisPool {
    pub fn shared(&self) -> ConnectionManager {
        self.shared.clone()
    }

    pub async fn dedicated(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to open dedicated Redis connection")
    }
}

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!("Connecting to Redis at {}", redact_url(&config.url));

    let client = Client::open(config.url.as_str()).context("Invalid Redis URL")?;
    let mut shared = ConnectionManager::new(client.clone())
        .await
        .context("Failed to connect to Redis")?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut shared)
        .await
        .context("Redis did not answer PING")?;

    tracing::info!("Redis ready");
    Ok(RedisPool { client, shared })
}
