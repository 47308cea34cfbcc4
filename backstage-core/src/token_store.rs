use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use std::sync::Arc;

use crate::db::DbPool;
use crate::schema::{backstage_device_tokens, backstage_users};
use crate::token::classify_token;
use crate::types::{DeactivationBatch, DeviceToken, TokenRegistration};

/// Maximum number of user ids in one "id in [...]" lookup.
pub const USER_QUERY_BATCH: usize = 10;

/// Persistence of users' device tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Active tokens owned by `user_ids`, issued as a single query.
    /// Callers keep `user_ids` within [`USER_QUERY_BATCH`].
    async fn active_tokens_for_users(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>>;

    /// Every token of a user regardless of state; `None` if the user does not exist.
    async fn user_tokens(&self, user_id: &str) -> Result<Option<Vec<DeviceToken>>>;

    /// Flip the listed entries inactive in one atomic commit. Returns rows changed.
    async fn deactivate(&self, batch: &DeactivationBatch) -> Result<u64>;

    /// Flip every inactive token of the user back to active. Returns rows changed.
    async fn reactivate_all(&self, user_id: &str) -> Result<u64>;

    /// Upsert the token for `(user, device)`, creating the user if needed.
    async fn register(&self, registration: &TokenRegistration) -> Result<DeviceToken>;

    /// Deactivate one device's token, or all tokens of the user when `device_id` is `None`.
    async fn disable(&self, user_id: &str, device_id: Option<&str>) -> Result<u64>;
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = backstage_device_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DeviceTokenRow {
    user_id: String,
    device_id: String,
    token: String,
    platform: String,
    token_type: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceTokenRow> for DeviceToken {
    type Error = anyhow::Error;

    fn try_from(row: DeviceTokenRow) -> Result<Self> {
        // A stored type wins; rows without one fall back to the token format
        let token_type = match row.token_type.as_deref() {
            Some(stored) => stored.parse()?,
            None => classify_token(&row.token),
        };

        Ok(DeviceToken {
            platform: row.platform.parse()?,
            token_type,
            token: row.token,
            user_id: row.user_id,
            device_id: row.device_id,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_tokens(rows: Vec<DeviceTokenRow>) -> Result<Vec<DeviceToken>> {
    rows.into_iter().map(DeviceToken::try_from).collect()
}

pub struct PgTokenStore {
    pool: Arc<DbPool>,
}

impl PgTokenStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn active_tokens_for_users(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>> {
        use crate::schema::backstage_device_tokens::dsl;

        let mut conn = self.pool.get().await?;
        let rows: Vec<DeviceTokenRow> = dsl::backstage_device_tokens
            .filter(dsl::user_id.eq_any(user_ids))
            .filter(dsl::is_active.eq(true))
            .order(dsl::id.asc())
            .select(DeviceTokenRow::as_select())
            .load(&mut conn)
            .await?;

        into_tokens(rows)
    }

    async fn user_tokens(&self, user_id: &str) -> Result<Option<Vec<DeviceToken>>> {
        use crate::schema::backstage_device_tokens::dsl;

        let mut conn = self.pool.get().await?;
        let exists: Option<String> = backstage_users::table
            .find(user_id)
            .select(backstage_users::id)
            .first(&mut conn)
            .await
            .optional()?;

        if exists.is_none() {
            return Ok(None);
        }

        let rows: Vec<DeviceTokenRow> = dsl::backstage_device_tokens
            .filter(dsl::user_id.eq(user_id))
            .order(dsl::id.asc())
            .select(DeviceTokenRow::as_select())
            .load(&mut conn)
            .await?;

        into_tokens(rows).map(Some)
    }

    async fn deactivate(&self, batch: &DeactivationBatch) -> Result<u64> {
        use crate::schema::backstage_device_tokens::dsl;

        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let changed = conn
            .transaction::<u64, diesel::result::Error, _>(|conn| {
                async move {
                    let now = Utc::now();
                    let mut changed = 0u64;

                    for (user_id, tokens) in &batch.by_owner {
                        if tokens.is_empty() {
                            continue;
                        }
                        changed += diesel::update(
                            dsl::backstage_device_tokens
                                .filter(dsl::user_id.eq(user_id))
                                .filter(dsl::token.eq_any(tokens))
                                .filter(dsl::is_active.eq(true)),
                        )
                        .set((dsl::is_active.eq(false), dsl::updated_at.eq(now)))
                        .execute(conn)
                        .await? as u64;
                    }

                    if !batch.unowned.is_empty() {
                        changed += diesel::update(
                            dsl::backstage_device_tokens
                                .filter(dsl::token.eq_any(&batch.unowned))
                                .filter(dsl::is_active.eq(true)),
                        )
                        .set((dsl::is_active.eq(false), dsl::updated_at.eq(now)))
                        .execute(conn)
                        .await? as u64;
                    }

                    Ok(changed)
                }
                .scope_boxed()
            })
            .await?;

        Ok(changed)
    }

    async fn reactivate_all(&self, user_id: &str) -> Result<u64> {
        use crate::schema::backstage_device_tokens::dsl;

        let mut conn = self.pool.get().await?;
        let changed = diesel::update(
            dsl::backstage_device_tokens
                .filter(dsl::user_id.eq(user_id))
                .filter(dsl::is_active.eq(false)),
        )
        .set((dsl::is_active.eq(true), dsl::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;

        Ok(changed as u64)
    }

    async fn register(&self, registration: &TokenRegistration) -> Result<DeviceToken> {
        use crate::schema::backstage_device_tokens::dsl;

        let mut conn = self.pool.get().await?;
        let row = conn
            .transaction::<DeviceTokenRow, diesel::result::Error, _>(|conn| {
                async move {
                    diesel::insert_into(backstage_users::table)
                        .values(backstage_users::id.eq(&registration.user_id))
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    let now = Utc::now();
                    diesel::insert_into(dsl::backstage_device_tokens)
                        .values((
                            dsl::user_id.eq(&registration.user_id),
                            dsl::device_id.eq(&registration.device_id),
                            dsl::token.eq(&registration.token),
                            dsl::platform.eq(registration.platform.as_str()),
                            dsl::token_type.eq(Some(registration.token_type.as_str())),
                            dsl::is_active.eq(true),
                        ))
                        .on_conflict((dsl::user_id, dsl::device_id))
                        .do_update()
                        .set((
                            dsl::token.eq(&registration.token),
                            dsl::platform.eq(registration.platform.as_str()),
                            dsl::token_type.eq(Some(registration.token_type.as_str())),
                            dsl::is_active.eq(true),
                            dsl::updated_at.eq(now),
                        ))
                        .returning(DeviceTokenRow::as_returning())
                        .get_result(conn)
                        .await
                }
                .scope_boxed()
            })
            .await?;

        DeviceToken::try_from(row)
    }

    async fn disable(&self, user_id: &str, device_id: Option<&str>) -> Result<u64> {
        use crate::schema::backstage_device_tokens::dsl;

        let mut conn = self.pool.get().await?;
        let mut query = diesel::update(dsl::backstage_device_tokens)
            .set((dsl::is_active.eq(false), dsl::updated_at.eq(Utc::now())))
            .into_boxed()
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::is_active.eq(true));

        if let Some(device_id) = device_id {
            query = query.filter(dsl::device_id.eq(device_id));
        }

        let changed = query.execute(&mut conn).await?;

        Ok(changed as u64)
    }
}
