//! Redis-backed store client.
//!
//! Implements the store port over a multiplexed
//! `redis::aio::ConnectionManager`. The adapter is deliberately thin:
//! no algorithm lives here, every decision runs inside the scripts.
//! Its one piece of intelligence is telling the `NOSCRIPT` signal
//! apart from every other failure, which is all the script cache needs
//! for its digest-then-body fallback.
//!
//! Reconnection is delegated to the connection manager; timeouts are
//! configured at connection time and surface as plain store errors.

use crate::application::ports::{StoreClient, StoreError};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Configuration for the Redis store client.
#[derive(Debug, Clone, Default)]
pub struct RedisStoreConfig {
    /// Maximum time to wait for a single response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// Maximum time to wait when (re)connecting. `None` waits forever.
    pub connection_timeout: Option<Duration>,
}

/// Store client backed by Redis.
///
/// Cloning is cheap and clones share the underlying connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: Arc<RwLock<ConnectionManager>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns the underlying error if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with custom timeouts.
    ///
    /// # Errors
    /// Returns the underlying error if the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let mut manager_config = ConnectionManagerConfig::new();
        if let Some(timeout) = config.response_timeout {
            manager_config = manager_config.set_response_timeout(timeout);
        }
        if let Some(timeout) = config.connection_timeout {
            manager_config = manager_config.set_connection_timeout(timeout);
        }
        let connection = ConnectionManager::new_with_config(client, manager_config).await?;
        tracing::debug!(url, "connected to redis");
        Ok(Self::new(connection))
    }

    /// Wrap an existing connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection: Arc::new(RwLock::new(connection)),
        }
    }

    fn map_err(e: RedisError) -> StoreError {
        if e.kind() == ErrorKind::NoScriptError {
            StoreError::UnknownScript
        } else {
            StoreError::backend(e)
        }
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn eval_by_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let mut conn = self.connection.write().await;
        let result: i64 = redis::cmd("EVALSHA")
            .arg(digest)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut *conn)
            .await
            .map_err(Self::map_err)?;
        Ok(result)
    }

    async fn eval_by_body(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let mut conn = self.connection.write().await;
        let result: i64 = redis::cmd("EVAL")
            .arg(body)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut *conn)
            .await
            .map_err(Self::map_err)?;
        Ok(result)
    }

    async fn hget_int(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.write().await;
        conn.hget::<_, _, Option<i64>>(key, field)
            .await
            .map_err(Self::map_err)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.write().await;
        conn.keys::<_, Vec<String>>(pattern)
            .await
            .map_err(Self::map_err)
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.write().await;
        conn.sadd::<_, _, ()>(set, member)
            .await
            .map_err(Self::map_err)
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.write().await;
        conn.srem::<_, _, ()>(set, member)
            .await
            .map_err(Self::map_err)
    }
}
