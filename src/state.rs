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

//! Read-through cache: a TTL-bound local map in front of an optional remote
//! tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::cache::{CacheBackend, NoopBackend};
use crate::metrics::CacheCounters;
use crate::model::CacheMetricsSnapshot;

#[derive(Clone)]
pub struct CacheState<T> {
    inner: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    remote: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    counters: CacheCounters,
}

#[derive(Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl<T> CacheState<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        default_ttl: Duration,
        remote: Arc<dyn CacheBackend>,
        counters: CacheCounters,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            remote,
            default_ttl,
            counters,
        }
    }

    /// Local-only cache with its own counters.
    pub fn local(default_ttl: Duration) -> Self {
        Self::new(default_ttl, Arc::new(NoopBackend), CacheCounters::detached())
    }

    pub fn remote_name(&self) -> &'static str {
        self.remote.name()
    }

    /// Look `key` up locally, then remotely.
    ///
    /// Counters reflect the local tier only, so a remote hit is still a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        let local = {
            let mut guard = self.inner.write().await;
            let now = Instant::now();
            match guard.get(key) {
                Some(entry) if entry.is_expired(now) => {
                    guard.remove(key);
                    None
                }
                Some(entry) => Some(entry.value.clone()),
                None => None,
            }
        };

        if local.is_some() {
            self.counters.hits.inc();
            return local;
        }
        self.counters.misses.inc();

        match self.remote.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(key, "remote cache hit");
                    Some(value)
                }
                Err(error) => {
                    tracing::debug!(key, %error, "discarding undecodable remote entry");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(key, %error, "remote cache lookup failed");
                None
            }
        }
    }

    /// Store `value` for `ttl` locally and mirror it to the remote tier.
    ///
    /// The remote copy uses whole seconds and is skipped for sub-second TTLs.
    pub async fn set(&self, key: &str, value: T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let remote_copy = serde_json::to_string(&value);

        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.write().await.insert(key.to_string(), entry);

        let ttl_seconds = ttl.as_secs();
        if ttl_seconds == 0 {
            return;
        }

        match remote_copy {
            Ok(raw) => {
                if let Err(error) = self.remote.set(key, raw, ttl_seconds).await {
                    tracing::warn!(key, %error, "remote cache write failed");
                }
            }
            Err(error) => tracing::debug!(key, %error, "value not serializable for remote cache"),
        }
    }

    /// Store with the default TTL.
    pub async fn put(&self, key: &str, value: T) {
        self.set(key, value, self.default_ttl).await;
    }

    pub async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
        if let Err(error) = self.remote.delete(key).await {
            tracing::warn!(key, %error, "remote cache delete failed");
        }
    }

    /// Drop every local entry.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.counters.hits.get(),
            misses: self.counters.misses.get(),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.inner.write().await;
        let now = Instant::now();
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MockCacheBackend;
    use crate::error::AppError;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn value_is_served_until_ttl_elapses() {
        let cache: CacheState<Vec<u32>> = CacheState::local(TTL);
        cache.set("a", vec![1, 2, 3], Duration::from_millis(1_500)).await;

        tokio::time::advance(Duration::from_millis(1_499)).await;
        assert_eq!(cache.get("a").await, Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 0, "expired entry is evicted on read");
    }

    #[tokio::test]
    async fn delete_and_clear_remove_entries() {
        let cache: CacheState<u32> = CacheState::local(TTL);
        cache.put("c", 789).await;
        cache.put("d", 1).await;
        cache.put("e", 2).await;

        cache.delete("c").await;
        assert_eq!(cache.get("c").await, None);
        assert_eq!(cache.get("d").await, Some(1));

        cache.clear().await;
        assert_eq!(cache.get("d").await, None);
        assert_eq!(cache.get("e").await, None);
    }

    #[tokio::test]
    async fn counters_track_local_outcomes() {
        let cache: CacheState<u32> = CacheState::local(TTL);
        assert_eq!(cache.get("x").await, None);
        cache.put("x", 1).await;
        assert_eq!(cache.get("x").await, Some(1));
        assert_eq!(cache.get("x").await, Some(1));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache: CacheState<u32> = CacheState::local(TTL);
        cache.set("z", 1, Duration::ZERO).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_drops_only_stale_entries() {
        let cache: CacheState<u32> = CacheState::local(TTL);
        cache.set("short", 1, Duration::from_secs(1)).await;
        cache.set("long", 2, Duration::from_secs(120)).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn remote_hit_still_counts_as_local_miss() {
        let mut remote = MockCacheBackend::new();
        remote
            .expect_get()
            .times(1)
            .returning(|key| {
                assert_eq!(key, "regions");
                Ok(Some("[1,2]".to_string()))
            });

        let cache: CacheState<Vec<u32>> =
            CacheState::new(TTL, Arc::new(remote), CacheCounters::detached());

        assert_eq!(cache.get("regions").await, Some(vec![1, 2]));
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 0);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn writes_are_mirrored_in_seconds() {
        let mut remote = MockCacheBackend::new();
        remote.expect_set().times(1).returning(|key, value, ttl| {
            assert_eq!(key, "k");
            assert_eq!(value, "\"v\"");
            assert_eq!(ttl, 60);
            Ok(())
        });
        remote.expect_delete().times(1).returning(|_| Ok(()));

        let cache: CacheState<String> =
            CacheState::new(TTL, Arc::new(remote), CacheCounters::detached());

        cache.set("k", "v".to_string(), Duration::from_millis(60_400)).await;
        cache.delete("k").await;
    }

    #[tokio::test]
    async fn remote_failures_are_swallowed() {
        let mut remote = MockCacheBackend::new();
        remote
            .expect_get()
            .returning(|_| Err(AppError::Internal(anyhow::anyhow!("connection refused"))));
        remote
            .expect_set()
            .returning(|_, _, _| Err(AppError::Internal(anyhow::anyhow!("connection refused"))));

        let cache: CacheState<u32> =
            CacheState::new(TTL, Arc::new(remote), CacheCounters::detached());

        assert_eq!(cache.get("missing").await, None);
        cache.put("k", 5).await;
        assert_eq!(cache.get("k").await, Some(5));
    }

    #[tokio::test]
    async fn undecodable_remote_entries_are_ignored() {
        let mut remote = MockCacheBackend::new();
        remote
            .expect_get()
            .returning(|_| Ok(Some("<html>".to_string())));

        let cache: CacheState<u32> =
            CacheState::new(TTL, Arc::new(remote), CacheCounters::detached());

        assert_eq!(cache.get("k").await, None);
    }
}
