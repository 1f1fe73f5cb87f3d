use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::{CacheError, CacheKey, CacheStore, CacheStoreConfig};

/// Redis-backed `CacheStore` over a single multiplexed connection, cheap to clone per call.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: MultiplexedConnection,
}

impl RedisCacheStore {
    pub async fn new(config: &CacheStoreConfig) -> Result<Self, CacheError> {
        Self::with_timeouts(
            &config.redis_url,
            Duration::from_millis(config.redis_response_timeout_ms),
            Duration::from_millis(config.redis_connection_timeout_ms),
        )
        .await
    }

    pub async fn with_timeouts(
        addr: &str,
        response_timeout: Duration,
        connection_timeout: Duration,
    ) -> Result<Self, CacheError> {
        if response_timeout.is_zero() || connection_timeout.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "redis timeouts must be greater than zero".to_owned(),
            ));
        }

        let client = redis::Client::open(addr)?;
        let config = redis::AsyncConnectionConfig::new()
            .set_response_timeout(response_timeout)
            .set_connection_timeout(connection_timeout);
        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(Self { connection })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    // EX 0 is rejected by redis
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key.as_str()).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        // An explicit MGET keeps the reply an array even for a single key.
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.as_str());
        }

        let mut conn = self.connection.clone();
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key.as_str(), value, ttl_seconds(ttl))
            .await?;
        Ok(())
    }

    async fn mset(
        &self,
        entries: Vec<(CacheKey, Vec<u8>)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }

        let seconds = ttl_seconds(ttl);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key.as_str())
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .ignore();
        }

        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
