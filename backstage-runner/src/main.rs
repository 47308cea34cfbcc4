use anyhow::{Context, Result};
use backstage_api::auth::generate_token;
use backstage_api::{run as run_api, ApiState};
use backstage_core::{db, BackstageContext, Config};
use backstage_delivery::{ExpoRelay, FcmGateway};
use backstage_messaging::{MessagingService, RedisChangeFeed, RedisUnreadCache};
use backstage_notify::Dispatcher;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    if env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

const DEFAULT_TOKEN_DAYS: u64 = 30;

/// `backstage-runner issue-token <subject> [days]` prints a console bearer
/// token signed with `JWT_SECRET`.
fn issue_token(mut args: impl Iterator<Item = String>) -> Result<()> {
    let subject = args.next().context("usage: backstage-runner issue-token <subject> [days]")?;
    let days = match args.next() {
        Some(days) => days.parse().context("days must be a positive integer")?,
        None => DEFAULT_TOKEN_DAYS,
    };

    let config = Config::from_env();
    let token = generate_token(&subject, &config.server.jwt_secret, days)?;
    println!("{}", token);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    if args.next().as_deref() == Some("issue-token") {
        return issue_token(args);
    }

    init_tracing();

    tracing::info!("Starting Backstage server");

    let config = Config::from_env();
    db::run_migrations(&config.database).await?;
    let ctx = BackstageContext::new(config).await?;

    tracing::info!("Backstage context initialized");

    let delivery = &ctx.config.delivery;
    let dispatcher = Dispatcher::new(
        Arc::new(ctx.token_store()),
        Arc::new(FcmGateway::new(delivery)?),
        Arc::new(ExpoRelay::new(delivery)?),
        Duration::from_secs(delivery.provider_timeout_secs),
    );

    let mut messaging = MessagingService::new(
        Arc::new(ctx.conversation_store()),
        Arc::new(RedisUnreadCache::new(ctx.redis_pool.clone())),
        Arc::new(RedisChangeFeed::new(ctx.redis_pool.clone())),
    );
    if ctx.config.messaging.notify_recipients {
        messaging = messaging.with_notifier(dispatcher.clone());
    }

    let state = ApiState::new(dispatcher, messaging, &ctx.config.server.jwt_secret);
    run_api(state, &ctx.config.server).await?;

    Ok(())
}
