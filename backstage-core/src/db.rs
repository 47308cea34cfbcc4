use anyhow::{anyhow, Context, Result};
use diesel::Connection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

use crate::config::{redact_url, DatabaseConfig};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const CONNECT_ATTEMPTS: u32 = 5;
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(15);

/// Backoff before the given (1-based) retry: 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Builds the pool and proves it can hand out a connection, retrying with
/// exponential backoff while Postgres comes up.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    tracing::info!(
        "Connecting to Postgres at {} (max {} connections)",
        redact_url(&config.url),
        config.max_connections
    );

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .context("Failed to build database pool")?;

    let mut last_error = anyhow!("no connection attempt made");
    for attempt in 1..=CONNECT_ATTEMPTS {
        match timeout(CHECKOUT_TIMEOUT, pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!("Postgres ready after {} attempt(s)", attempt);
                return Ok(Arc::new(pool));
            }
            Ok(Err(e)) => last_error = anyhow!("checkout failed: {}", e),
            Err(_) => last_error = anyhow!("checkout timed out after {:?}", CHECKOUT_TIMEOUT),
        }
        tracing::warn!("Postgres attempt {}/{}: {}", attempt, CONNECT_ATTEMPTS, last_error);

        if attempt < CONNECT_ATTEMPTS {
            sleep(backoff(attempt)).await;
        }
    }

    Err(last_error.context("Postgres unavailable"))
}

/// Apply pending embedded migrations. Runs on a blocking thread because the
/// migration harness drives a synchronous connection wrapper.
pub async fn run_migrations(config: &DatabaseConfig) -> Result<()> {
    let url = config.url.clone();

    let applied = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .context("Failed to connect for migrations")?;
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;
        Ok(versions.len())
    })
    .await
    .context("Migration task panicked")??;

    if applied > 0 {
        tracing::info!("Applied {} database migration(s)", applied);
    } else {
        tracing::info!("Database schema is up to date");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(40), Duration::from_secs(32));
    }
}
