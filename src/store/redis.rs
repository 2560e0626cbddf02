//! Redis implementation of the store contract.
//!
//! Window state is a sorted set of event timestamps per key; the prune,
//! count, record and expiry-refresh steps run inside a single MULTI/EXEC
//! pipeline so concurrent callers from any number of server processes
//! serialize on the store. Burst counters are plain `INCR` keys whose
//! expiry is armed once, on creation.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{RateLimitStore, StoreError, WindowSnapshot};
use crate::config::StoreConfig;

/// Shared store client backed by Redis.
pub struct RedisStore {
    manager: ConnectionManager,
    key_prefix: String,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect to the store and verify the connection with a ping.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;

        let connect = async {
            let manager = ConnectionManager::new(client).await?;
            let mut conn = manager.clone();
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok::<_, StoreError>(manager)
        };

        let manager = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| StoreError::Timeout(config.connect_timeout()))??;

        debug!(url = %config.url, "Connected to shared store");

        Ok(Self {
            manager,
            key_prefix: config.key_prefix.clone(),
            op_timeout: config.op_timeout(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        full_key(&self.key_prefix, key)
    }

    /// Run a pipeline with the bounded operation timeout.
    async fn run<T: FromRedisValue>(&self, pipe: &redis::Pipeline) -> Result<T, StoreError> {
        let mut conn = self.manager.clone();
        match tokio::time::timeout(self.op_timeout, pipe.query_async::<T>(&mut conn)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

fn full_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn record_event(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        let key = self.full_key(key);
        // Members must stay unique even when two processes record the same
        // millisecond for the same key.
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(window_start_ms)
            .ignore()
            .zcard(&key)
            .zadd(&key, member, now_ms)
            .ignore()
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl.as_millis() as i64)
            .ignore();

        let (prior_count, oldest): (u64, Vec<(String, i64)>) = self.run(&pipe).await?;
        let oldest_ms = oldest.first().map(|(_, score)| *score).unwrap_or(now_ms);

        Ok(WindowSnapshot {
            prior_count,
            oldest_ms,
        })
    }

    async fn increment_counter(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let key = self.full_key(key);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("INCR")
            .arg(&key)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .arg("NX")
            .ignore();

        let (count,): (u64,) = self.run(&pipe).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_composition() {
        assert_eq!(full_key("floodgate", "window:ip:10.0.0.1"), "floodgate:window:ip:10.0.0.1");
        assert_eq!(full_key("floodgate", "burst:10.0.0.1"), "floodgate:burst:10.0.0.1");
    }

    #[test]
    fn test_timeout_error_display() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
