//! Redis [`CacheStore`]
//!
//! Keys get the configured namespace prefix. Every command runs under the
//! `cache.timeout_ms` deadline; multi-key writes go through one `MULTI` pipeline.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use super::store::CacheStore;
use crate::config::CacheConfig;
use crate::errors::RagError;
use crate::errors::Result;

/// Redis-backed [`CacheStore`] sharing one multiplexed connection.
pub struct RedisStore {
    client: redis::Client,
    namespace: String,
    timeout: Duration,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    pub fn connect(config: &CacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RagError::CacheError(format!("Redis open error: {e}")))?;

        Ok(Self {
            client,
            namespace: config.namespace.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            connection: Mutex::new(None),
        })
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.namespace, k)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Opening Redis connection");
        let conn = tokio::time::timeout(self.timeout, self.client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| RagError::Timeout("Redis connect timed out".to_string()))?
            .map_err(|e| RagError::CacheError(format!("Redis connect error: {e}")))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command with the per-command deadline, dropping the shared
    /// connection when it turns out to be broken.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    warn!("Redis connection lost during {}: {}", op, e);
                    self.connection.lock().await.take();
                }
                Err(RagError::CacheError(format!("Redis {op} error: {e}")))
            }
            Err(_) => {
                self.connection.lock().await.take();
                Err(RagError::Timeout(format!("Redis {op} timed out")))
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let k = self.key(key);
        self.run("GET", |mut conn| async move {
            redis::cmd("GET")
                .arg(k)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn set_many_ex(&self, entries: &[(String, String)], ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SETEX")
                .arg(self.key(key))
                .arg(ttl.as_secs().max(1))
                .arg(value)
                .ignore();
        }
        self.run("SETEX", |mut conn| async move {
            pipe.query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn scan(&self, pattern: &str, count_hint: usize) -> Result<Vec<String>> {
        let full_pattern = self.key(pattern);
        let namespace_len = self.namespace.len();
        self.run("SCAN", |mut conn| async move {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&full_pattern)
                    .arg("COUNT")
                    .arg(count_hint)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch.into_iter().map(|k| k[namespace_len..].to_string()));
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.run("DEL", |mut conn| async move {
            redis::cmd("DEL")
                .arg(full)
                .query_async::<_, usize>(&mut conn)
                .await
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.run("PING", |mut conn| async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_prefix() {
        let config = CacheConfig {
            namespace: "ragserve:".to_string(),
            ..CacheConfig::default()
        };
        let store = RedisStore::connect(&config).unwrap();
        assert_eq!(store.key("cache:exact:ws:1"), "ragserve:cache:exact:ws:1");
    }

    #[test]
    fn test_invalid_url() {
        let config = CacheConfig {
            url: "not-a-redis-url".to_string(),
            ..CacheConfig::default()
        };
        assert!(matches!(
            RedisStore::connect(&config),
            Err(RagError::CacheError(_))
        ));
    }

    #[tokio::test]
    #[ignore = "Requires a running Redis server"]
    async fn test_redis_roundtrip() {
        let store = RedisStore::connect(&CacheConfig::default()).unwrap();
        store.ping().await.unwrap();
        store
            .set_many_ex(
                &[("ragserve:test".to_string(), "v".to_string())],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(store.get("ragserve:test").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.delete(&["ragserve:test".to_string()]).await.unwrap(), 1);
    }
}
