// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Remote tiers behind the local cache.
//!
//! A backend stores opaque strings with a TTL in seconds. Which one is used
//! is decided once at startup from [`RemoteCacheConfig`].

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RemoteCacheConfig;
use crate::error::AppError;

const KEY_PREFIX: &str = "farmaproxy:";

/// Trait for remote cache backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Build the backend selected by configuration.
pub fn backend_from_config(config: &RemoteCacheConfig) -> Result<Arc<dyn CacheBackend>, AppError> {
    let backend: Arc<dyn CacheBackend> = match config {
        RemoteCacheConfig::None => Arc::new(NoopBackend),
        RemoteCacheConfig::Redis { url } => Arc::new(RedisBackend::new(url)?),
        RemoteCacheConfig::Upstash { url, token } => Arc::new(UpstashBackend::new(url, token)?),
    };
    Ok(backend)
}

fn build_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

/// Backend used when no remote tier is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBackend;

#[async_trait]
impl CacheBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl_seconds: u64) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Redis-based cache backend
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Test the Redis connection
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection().await?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis PING failed: {}", e)))?;

        Ok(())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection().await?;

        conn.get(build_key(key))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis GET failed: {}", e)))
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), AppError> {
        let mut conn = self.connection().await?;

        redis::cmd("SET")
            .arg(build_key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis SETEX failed: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.connection().await?;

        let _: i64 = conn
            .del(build_key(key))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis DEL failed: {}", e)))?;

        Ok(())
    }
}

/// Upstash Redis over its REST interface.
///
/// Commands are posted as a JSON array to the database URL with a bearer
/// token; replies are `{"result": ...}` or `{"error": "..."}`.
#[derive(Clone)]
pub struct UpstashBackend {
    url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashBackend {
    pub fn new(url: &str, token: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to build Upstash client: {}", e))
            })?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    async fn command(&self, args: &[&str]) -> Result<Value, AppError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Upstash request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(anyhow::anyhow!("Upstash error {}", status)));
        }

        let reply: UpstashReply = response
            .json()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid Upstash reply: {}", e)))?;

        match reply.error {
            Some(error) => Err(AppError::Internal(anyhow::anyhow!("Upstash error: {}", error))),
            None => Ok(reply.result),
        }
    }
}

#[async_trait]
impl CacheBackend for UpstashBackend {
    fn name(&self) -> &'static str {
        "upstash"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let result = self.command(&["GET", &build_key(key)]).await?;
        Ok(match result {
            Value::Null => None,
            Value::String(value) => Some(value),
            other => Some(other.to_string()),
        })
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), AppError> {
        let ttl = ttl_seconds.to_string();
        self.command(&["SET", &build_key(key), &value, "EX", &ttl]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.command(&["DEL", &build_key(key)]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_backend_never_hits() {
        let backend = NoopBackend;
        backend.set("k", "v".to_string(), 60).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.name(), "none");
    }

    #[test]
    fn backend_selection_follows_config() {
        let none = backend_from_config(&RemoteCacheConfig::None).unwrap();
        assert_eq!(none.name(), "none");

        let upstash = backend_from_config(&RemoteCacheConfig::Upstash {
            url: "https://example.upstash.io/".to_string(),
            token: "tok".to_string(),
        })
        .unwrap();
        assert_eq!(upstash.name(), "upstash");

        let redis = backend_from_config(&RemoteCacheConfig::Redis {
            url: "redis://127.0.0.1:6379".to_string(),
        })
        .unwrap();
        assert_eq!(redis.name(), "redis");
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(build_key("regions"), "farmaproxy:regions");
    }
}
