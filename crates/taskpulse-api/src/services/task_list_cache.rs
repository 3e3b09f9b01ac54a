//! Per-owner cache of the serialized, unfiltered task list.
//!
//! Entries expire after a fixed TTL and are invalidated by every write path.
//! Backend failures degrade to a miss (reads) or a no-op (writes) and never
//! fail the request that triggered them.
//!
//! Each owner also has a generation counter bumped by [`TaskListCache::invalidate`].
//! A reader captures the generation before querying the store and fills the
//! cache with [`TaskListCache::put_if_current`], so a list read that overlaps
//! a write can never re-cache the pre-write list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskpulse_core::defaults::TASK_LIST_CACHE_PREFIX;

use crate::config::{ApiConfig, CacheBackend};

/// Store the list only if the owner's generation is unchanged.
const SET_IF_CURRENT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SETEX', KEYS[1], ARGV[3], ARGV[2])
return 1
";

/// Drop the list and bump the owner's generation in one step.
const INVALIDATE_SCRIPT: &str = r"
redis.call('DEL', KEYS[1])
return redis.call('INCR', KEYS[2])
";

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<Uuid, MemoryEntry>,
    generations: HashMap<Uuid, u64>,
}

enum Backend {
    Memory(RwLock<MemoryState>),
    Redis(ConnectionManager),
    Disabled,
}

struct CacheInner {
    backend: Backend,
    ttl: Duration,
    prefix: String,
}

/// Shared handle to the task list cache. Cheap to clone.
#[derive(Clone)]
pub struct TaskListCache {
    inner: Arc<CacheInner>,
}

impl TaskListCache {
    fn with_backend(backend: Backend, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                ttl,
                prefix: TASK_LIST_CACHE_PREFIX.to_string(),
            }),
        }
    }

    /// In-process cache.
    pub fn memory(ttl: Duration) -> Self {
        Self::with_backend(Backend::Memory(RwLock::new(MemoryState::default())), ttl)
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled, Duration::ZERO)
    }

    /// Redis-backed cache. Falls back to [`TaskListCache::disabled`] when the
    /// server cannot be reached.
    pub async fn redis(url: &str, ttl: Duration) -> Self {
        match redis::Client::open(url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(
                        subsystem = "cache",
                        ttl_secs = ttl.as_secs(),
                        "Redis task list cache enabled"
                    );
                    Self::with_backend(Backend::Redis(conn), ttl)
                }
                Err(e) => {
                    warn!(subsystem = "cache", error = %e, "Failed to connect to Redis, cache disabled");
                    Self::disabled()
                }
            },
            Err(e) => {
                warn!(subsystem = "cache", error = %e, "Invalid Redis URL, cache disabled");
                Self::disabled()
            }
        }
    }

    /// Build the backend selected by `CACHE_BACKEND`.
    pub async fn from_config(config: &ApiConfig) -> Self {
        match config.cache {
            CacheBackend::Memory => Self::memory(config.cache_ttl),
            CacheBackend::Redis => Self::redis(&config.redis_url, config.cache_ttl).await,
            CacheBackend::Off => {
                info!(subsystem = "cache", "Task list cache disabled via CACHE_BACKEND=off");
                Self::disabled()
            }
        }
    }

    /// Name of the active backend, for logs and health output.
    pub fn backend_name(&self) -> &'static str {
        match self.inner.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
            Backend::Disabled => "disabled",
        }
    }

    /// Fixed TTL applied to every entry.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Cache key for an owner.
    pub fn key(&self, owner_id: Uuid) -> String {
        format!("{}{}", self.inner.prefix, owner_id)
    }

    fn generation_key(&self, owner_id: Uuid) -> String {
        format!("{}{}:gen", self.inner.prefix, owner_id)
    }

    /// Cached list for `owner_id`, if present and unexpired.
    pub async fn get(&self, owner_id: Uuid) -> Option<String> {
        match &self.inner.backend {
            Backend::Memory(state) => {
                let now = Instant::now();
                {
                    let state = state.read().await;
                    match state.entries.get(&owner_id) {
                        Some(entry) if entry.expires_at > now => {
                            debug!(subsystem = "cache", owner_id = %owner_id, "Cache HIT");
                            return Some(entry.value.clone());
                        }
                        Some(_) => {}
                        None => {
                            debug!(subsystem = "cache", owner_id = %owner_id, "Cache MISS");
                            return None;
                        }
                    }
                }
                // Expired: drop it unless a fresher value raced in.
                let mut state = state.write().await;
                if state
                    .entries
                    .get(&owner_id)
                    .is_some_and(|entry| entry.expires_at <= now)
                {
                    state.entries.remove(&owner_id);
                }
                debug!(subsystem = "cache", owner_id = %owner_id, "Cache MISS (expired)");
                None
            }
            Backend::Redis(conn) => {
                let key = self.key(owner_id);
                let mut conn = conn.clone();
                match conn.get::<_, Option<String>>(&key).await {
                    Ok(Some(value)) => {
                        debug!(subsystem = "cache", key = %key, "Cache HIT");
                        Some(value)
                    }
                    Ok(None) => {
                        debug!(subsystem = "cache", key = %key, "Cache MISS");
                        None
                    }
                    Err(e) => {
                        error!(subsystem = "cache", key = %key, error = %e, "Redis GET error");
                        None
                    }
                }
            }
            Backend::Disabled => None,
        }
    }

    /// Store `value` for `owner_id` with the configured TTL, overwriting
    /// any previous entry.
    pub async fn put(&self, owner_id: Uuid, value: String) {
        if let Some(generation) = self.generation(owner_id).await {
            self.put_if_current(owner_id, generation, value).await;
        }
    }

    /// Current generation for `owner_id`, or `None` when the backend cannot
    /// say (disabled or unreachable), in which case nothing should be cached.
    pub async fn generation(&self, owner_id: Uuid) -> Option<u64> {
        match &self.inner.backend {
            Backend::Memory(state) => Some(
                state
                    .read()
                    .await
                    .generations
                    .get(&owner_id)
                    .copied()
                    .unwrap_or(0),
            ),
            Backend::Redis(conn) => {
                let key = self.generation_key(owner_id);
                let mut conn = conn.clone();
                match conn.get::<_, Option<u64>>(&key).await {
                    Ok(generation) => Some(generation.unwrap_or(0)),
                    Err(e) => {
                        error!(subsystem = "cache", key = %key, error = %e, "Redis GET error");
                        None
                    }
                }
            }
            Backend::Disabled => None,
        }
    }

    /// Store `value` unless `owner_id` was invalidated after `generation`
    /// was read. Returns whether the value was stored.
    pub async fn put_if_current(&self, owner_id: Uuid, generation: u64, value: String) -> bool {
        let ttl = self.inner.ttl;
        if ttl.is_zero() {
            return false;
        }
        match &self.inner.backend {
            Backend::Memory(state) => {
                let mut state = state.write().await;
                let current = state.generations.get(&owner_id).copied().unwrap_or(0);
                if current != generation {
                    debug!(subsystem = "cache", owner_id = %owner_id, "Cache SET skipped, list changed");
                    return false;
                }
                state.entries.insert(
                    owner_id,
                    MemoryEntry {
                        value,
                        expires_at: Instant::now() + ttl,
                    },
                );
                debug!(subsystem = "cache", owner_id = %owner_id, ttl_secs = ttl.as_secs(), "Cache SET");
                true
            }
            Backend::Redis(conn) => {
                let key = self.key(owner_id);
                let mut conn = conn.clone();
                let script = redis::Script::new(SET_IF_CURRENT_SCRIPT);
                let result = script
                    .key(&key)
                    .key(self.generation_key(owner_id))
                    .arg(generation)
                    .arg(value)
                    .arg(ttl.as_secs().max(1))
                    .invoke_async::<i64>(&mut conn)
                    .await;
                match result {
                    Ok(1) => {
                        debug!(subsystem = "cache", key = %key, "Cache SET");
                        true
                    }
                    Ok(_) => {
                        debug!(subsystem = "cache", key = %key, "Cache SET skipped, list changed");
                        false
                    }
                    Err(e) => {
                        error!(subsystem = "cache", key = %key, error = %e, "Redis SET error");
                        false
                    }
                }
            }
            Backend::Disabled => false,
        }
    }

    /// Remove the entry for `owner_id` and bump its generation. Idempotent
    /// with respect to what readers see.
    pub async fn invalidate(&self, owner_id: Uuid) {
        match &self.inner.backend {
            Backend::Memory(state) => {
                let mut state = state.write().await;
                state.entries.remove(&owner_id);
                *state.generations.entry(owner_id).or_insert(0) += 1;
                debug!(subsystem = "cache", owner_id = %owner_id, "Cache INVALIDATE");
            }
            Backend::Redis(conn) => {
                let key = self.key(owner_id);
                let mut conn = conn.clone();
                let script = redis::Script::new(INVALIDATE_SCRIPT);
                let result = script
                    .key(&key)
                    .key(self.generation_key(owner_id))
                    .invoke_async::<i64>(&mut conn)
                    .await;
                match result {
                    Ok(_) => debug!(subsystem = "cache", key = %key, "Cache INVALIDATE"),
                    Err(e) => {
                        error!(subsystem = "cache", key = %key, error = %e, "Redis invalidate error")
                    }
                }
            }
            Backend::Disabled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = TaskListCache::memory(Duration::from_secs(60));
        let owner = Uuid::now_v7();
        cache.put(owner, "[]".to_string()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(owner).await.as_deref(), Some("[]"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(owner).await, None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = TaskListCache::memory(Duration::from_secs(60));
        let owner = Uuid::now_v7();
        cache.put(owner, "[1]".to_string()).await;
        cache.put(owner, "[2]".to_string()).await;
        assert_eq!(cache.get(owner).await.as_deref(), Some("[2]"));
    }

    #[tokio::test]
    async fn test_invalidate_twice_is_same_as_once() {
        let cache = TaskListCache::memory(Duration::from_secs(60));
        let owner = Uuid::now_v7();
        let other = Uuid::now_v7();
        cache.put(owner, "[]".to_string()).await;
        cache.put(other, "[]".to_string()).await;

        cache.invalidate(owner).await;
        cache.invalidate(owner).await;

        assert_eq!(cache.get(owner).await, None);
        assert!(cache.get(other).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = TaskListCache::disabled();
        let owner = Uuid::now_v7();
        cache.put(owner, "[]".to_string()).await;
        assert_eq!(cache.get(owner).await, None);
        assert_eq!(cache.backend_name(), "disabled");
    }

    #[tokio::test]
    async fn test_put_if_current_rejects_value_read_before_invalidate() {
        let cache = TaskListCache::memory(Duration::from_secs(60));
        let owner = Uuid::now_v7();

        let before = cache.generation(owner).await.unwrap();
        cache.invalidate(owner).await;
        assert!(!cache.put_if_current(owner, before, "[old]".to_string()).await);
        assert_eq!(cache.get(owner).await, None);

        let after = cache.generation(owner).await.unwrap();
        assert!(cache.put_if_current(owner, after, "[new]".to_string()).await);
        assert_eq!(cache.get(owner).await.as_deref(), Some("[new]"));
    }

    #[tokio::test]
    async fn test_disabled_cache_has_no_generation() {
        let cache = TaskListCache::disabled();
        let owner = Uuid::now_v7();
        assert_eq!(cache.generation(owner).await, None);
        assert!(!cache.put_if_current(owner, 0, "[]".to_string()).await);
    }

    #[test]
    fn test_key_prefix() {
        let cache = TaskListCache::disabled();
        let owner = Uuid::nil();
        assert_eq!(
            cache.key(owner),
            "tp:tasks:00000000-0000-0000-0000-000000000000"
        );
    }
}
