//! Redis-backed throttle cache

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, PoolConfig as PoolSize, Runtime};
use redis::AsyncCommands;
use tracing::debug;

use super::{CacheScope, ThrottleCache};
use crate::config::RedisConfig;
use crate::error::{Error, Result};

/// Throttle cache shared by every instance through Redis
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Create a new Redis connection pool
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let mut cfg = PoolConfig::from_url(config.url.as_str());
        cfg.pool = Some(PoolSize::new(config.max_connections));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::cache(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Redis expiries are whole seconds; never round a window down to zero.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl ThrottleCache for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    fn scope(&self) -> CacheScope {
        CacheScope::Shared
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;

        debug!(key = %key, created = reply.is_some(), "SET NX EX");
        Ok(reply.is_some())
    }
}
