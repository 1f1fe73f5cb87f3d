//! # PgChannel
//!
//! Channels stored as rows of a PostgreSQL table. Consumers claim messages with
//! `FOR UPDATE SKIP LOCKED`, so any number of them can poll the same channel.
use std::str::FromStr;
use std::time;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{dead_letter_channel, ChannelConfig, ChannelError, Delivery, Headers, MessageChannel, Nack};

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    channel: String,
    body: Vec<u8>,
    headers: sqlx::types::Json<Headers>,
    attempt: i32,
}

impl From<MessageRow> for Delivery {
    fn from(row: MessageRow) -> Self {
        Delivery {
            id: row.id,
            channel: row.channel,
            body: row.body,
            headers: row.headers.0,
            attempt: row.attempt,
        }
    }
}

/// A set of channels sharing one table and one bounded connection pool.
#[derive(Clone)]
pub struct PgChannel {
    pool: PgPool,
    acquire_timeout: time::Duration,
    /// Recorded on every message this process claims.
    consumer: String,
}

impl PgChannel {
    /// The pool connects lazily, so an unreachable database surfaces on first use.
    pub fn new(config: &ChannelConfig, consumer: &str) -> Result<Self, ChannelError> {
        let options = PgConnectOptions::from_str(&config.channel_database_url)
            .map_err(|error| ChannelError::PoolCreationError { error })?
            .application_name(consumer);
        let pool = PgPoolOptions::new()
            .max_connections(config.channel_max_handles)
            .acquire_timeout(config.acquire_timeout())
            .connect_lazy_with(options);

        Ok(Self::from_pool(pool, config.acquire_timeout(), consumer))
    }

    pub fn from_pool(pool: PgPool, acquire_timeout: time::Duration, consumer: &str) -> Self {
        Self {
            pool,
            acquire_timeout,
            consumer: consumer.to_owned(),
        }
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, ChannelError> {
        self.pool.acquire().await.map_err(|error| match error {
            sqlx::Error::PoolTimedOut => ChannelError::PoolExhausted(self.acquire_timeout),
            error => ChannelError::ConnectionError { error },
        })
    }

    /// Make messages claimed more than `older_than` ago available again. Their consumer is
    /// assumed to have died before settling them.
    pub async fn requeue_stalled(&self, older_than: time::Duration) -> Result<u64, ChannelError> {
        let mut conn = self.acquire().await?;
        let result = sqlx::query(
            r#"
UPDATE channel_messages
SET
    status = 'available'::message_status,
    scheduled_at = NOW()
WHERE
    status = 'delivered'::message_status
    AND delivered_at < NOW() - $1::interval
            "#,
        )
        .bind(older_than)
        .execute(&mut *conn)
        .await
        .map_err(|error| ChannelError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected())
    }

    pub async fn purge_acked(&self, older_than: time::Duration) -> Result<u64, ChannelError> {
        let mut conn = self.acquire().await?;
        let result = sqlx::query(
            r#"
DELETE FROM channel_messages
WHERE
    status = 'acked'::message_status
    AND acked_at < NOW() - $1::interval
            "#,
        )
        .bind(older_than)
        .execute(&mut *conn)
        .await
        .map_err(|error| ChannelError::QueryError {
            command: "DELETE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected())
    }

    /// Periodically requeue stalled messages and purge acked ones until `shutdown` fires.
    pub async fn run_janitor(self, config: ChannelConfig, shutdown: CancellationToken) {
        let interval = time::Duration::from_secs(config.channel_janitor_interval_secs);
        let stalled_after = time::Duration::from_secs(config.channel_stalled_after_secs);
        let retention = time::Duration::from_secs(config.channel_acked_retention_secs);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match self.requeue_stalled(stalled_after).await {
                Ok(0) => {}
                Ok(count) => info!(count, "requeued stalled messages"),
                Err(error) => error!("failed to requeue stalled messages: {}", error),
            }
            match self.purge_acked(retention).await {
                Ok(0) => {}
                Ok(count) => info!(count, "purged acked messages"),
                Err(error) => error!("failed to purge acked messages: {}", error),
            }
        }
    }
}

#[async_trait]
impl MessageChannel for PgChannel {
    async fn declare(&self, channel: &str) -> Result<(), ChannelError> {
        let mut conn = self.acquire().await?;
        sqlx::query("INSERT INTO channels (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(channel)
            .execute(&mut *conn)
            .await
            .map_err(|error| ChannelError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), ChannelError> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            r#"
WITH declared AS (
    INSERT INTO channels (name) VALUES ($1) ON CONFLICT (name) DO NOTHING
)
INSERT INTO channel_messages (channel, body, headers, status, scheduled_at)
VALUES ($1, $2, $3, 'available'::message_status, NOW())
            "#,
        )
        .bind(channel)
        .bind(body)
        .bind(sqlx::types::Json(headers))
        .execute(&mut *conn)
        .await
        .map_err(|error| ChannelError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.acquire().await?;

        let row: Option<MessageRow> = sqlx::query_as(
            r#"
WITH next_message AS (
    SELECT
        id
    FROM
        channel_messages
    WHERE
        status = 'available'::message_status
        AND scheduled_at <= NOW()
        AND channel = $1
    ORDER BY
        scheduled_at,
        id
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE
    channel_messages
SET
    status = 'delivered'::message_status,
    delivered_at = NOW(),
    delivered_by = $2,
    attempt = attempt + 1
FROM
    next_message
WHERE
    channel_messages.id = next_message.id
RETURNING
    channel_messages.id,
    channel_messages.channel,
    channel_messages.body,
    channel_messages.headers,
    channel_messages.attempt
            "#,
        )
        .bind(channel)
        .bind(&self.consumer)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|error| ChannelError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(row.map(Delivery::from))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.acquire().await?;
        let result = sqlx::query(
            r#"
UPDATE channel_messages
SET
    status = 'acked'::message_status,
    acked_at = NOW()
WHERE
    id = $1
    AND status = 'delivered'::message_status
            "#,
        )
        .bind(delivery.id)
        .execute(&mut *conn)
        .await
        .map_err(|error| ChannelError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        if result.rows_affected() == 0 {
            return Err(ChannelError::NotInFlight(delivery.id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, nack: Nack) -> Result<(), ChannelError> {
        let mut conn = self.acquire().await?;

        let query = match &nack {
            Nack::Requeue { delay } => sqlx::query(
                r#"
UPDATE channel_messages
SET
    status = 'available'::message_status,
    scheduled_at = NOW() + $2::interval
WHERE
    id = $1
    AND status = 'delivered'::message_status
                "#,
            )
            .bind(delivery.id)
            .bind(*delay),
            Nack::DeadLetter { reason } => sqlx::query(
                r#"
WITH declared AS (
    INSERT INTO channels (name) VALUES ($2) ON CONFLICT (name) DO NOTHING
)
UPDATE channel_messages
SET
    channel = $2,
    status = 'available'::message_status,
    attempt = 0,
    scheduled_at = NOW(),
    errors = array_append(errors, $3::text)
WHERE
    id = $1
    AND status = 'delivered'::message_status
                "#,
            )
            .bind(delivery.id)
            .bind(dead_letter_channel(&delivery.channel))
            .bind(reason.as_str()),
        };

        let result = query
            .execute(&mut *conn)
            .await
            .map_err(|error| ChannelError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        if result.rows_affected() == 0 {
            return Err(ChannelError::NotInFlight(delivery.id));
        }
        Ok(())
    }
}
