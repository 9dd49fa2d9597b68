// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key-value cache stores for emission records.
//!
//! Entries are opaque JSON strings written with a fixed expiry. Eviction and
//! expiry are owned by the store; callers only `get` and `set_with_ttl`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Upper bound for establishing the Redis connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound for a single GET / SETEX round trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
/// Wait after a failed connect before the next attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors from a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache store timed out after {0:?}")]
    Timeout(Duration),
}

/// Build the cache key for an electricity lookup.
///
/// Both parts are used verbatim, so `10` and `10.0` map to different entries.
pub fn emission_key(region: &str, energy: &str) -> String {
    format!("emission_{}_{}", region, energy)
}

/// A key-value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw value stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Redis-backed store using `GET` / `SETEX`.
///
/// The connection is established lazily on first use so the server can start
/// while Redis is still coming up. Only one request at a time attempts to
/// connect; every other request skips the cache until that attempt finishes
/// or [`RECONNECT_DELAY`] passes after a failure.
pub struct RedisCache {
    client: redis::Client,
    state: Mutex<RedisState>,
}

#[derive(Default)]
struct RedisState {
    manager: Option<ConnectionManager>,
    gate: ReconnectGate,
}

/// Decides when a new connect attempt may start.
#[derive(Debug, Default)]
struct ReconnectGate {
    next_attempt: Option<Instant>,
}

impl ReconnectGate {
    /// Claim the next attempt. The claim lapses after [`CONNECT_TIMEOUT`] so a
    /// cancelled attempt does not block reconnection.
    fn try_begin(&mut self, now: Instant) -> bool {
        match self.next_attempt {
            Some(at) if now < at => false,
            _ => {
                self.next_attempt = Some(now + CONNECT_TIMEOUT);
                true
            }
        }
    }

    fn failed(&mut self, now: Instant) {
        self.next_attempt = Some(now + RECONNECT_DELAY);
    }

    fn succeeded(&mut self) {
        self.next_attempt = None;
    }
}

impl RedisCache {
    /// Create a store for the given `redis://` URL without connecting.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("redis client: {e}")))?;
        Ok(Self {
            client,
            state: Mutex::new(RedisState::default()),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        {
            let mut state = self.state.lock().await;
            if let Some(manager) = &state.manager {
                return Ok(manager.clone());
            }
            if !state.gate.try_begin(Instant::now()) {
                return Err(CacheError::Unavailable("redis not connected".into()));
            }
        }

        // Single attempt, no built-in backoff: the gate handles retries.
        let result = bounded(
            CONNECT_TIMEOUT,
            ConnectionManager::new_with_backoff(self.client.clone(), 2, 100, 0),
        )
        .await;

        let mut state = self.state.lock().await;
        match result {
            Ok(manager) => {
                tracing::info!("Connected to Redis");
                state.gate.succeeded();
                state.manager = Some(manager.clone());
                Ok(manager)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis connect failed");
                state.gate.failed(Instant::now());
                Err(e)
            }
        }
    }
}

fn get_cmd(key: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key);
    cmd
}

fn setex_cmd(key: &str, value: &str, ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SETEX");
    cmd.arg(key).arg(ttl.as_secs().max(1)).arg(value);
    cmd
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| CacheError::Unavailable(e.to_string())),
        Err(_) => Err(CacheError::Timeout(limit)),
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let cmd = get_cmd(key);
        let value =
            bounded(COMMAND_TIMEOUT, cmd.query_async::<_, Option<String>>(&mut conn)).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let cmd = setex_cmd(key, value, ttl);
        bounded(COMMAND_TIMEOUT, cmd.query_async::<_, ()>(&mut conn)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process store with the same expiry semantics as the Redis backend.
///
/// Expired entries are dropped on read and swept on write once the earliest
/// expiry has passed, so unread keys do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryEntries>,
}

#[derive(Debug, Default)]
struct MemoryEntries {
    map: HashMap<String, MemoryEntry>,
    /// Earliest expiry among stored entries; may be stale-early after overwrites.
    next_expiry: Option<Instant>,
}

impl MemoryEntries {
    fn sweep(&mut self, now: Instant) {
        if !self.next_expiry.is_some_and(|at| at <= now) {
            return;
        }
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at > now);
        self.next_expiry = self.map.values().map(|entry| entry.expires_at).min();
        tracing::debug!(removed = before - self.map.len(), "Swept expired cache entries");
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires.
    #[cfg(test)]
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock().await;
        inner
            .map
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.inner.lock().await;
        match inner.map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        // Expired.
        inner.map.remove(key);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut inner = self.inner.lock().await;
        inner.sweep(now);
        inner.map.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        inner.next_expiry = Some(inner.next_expiry.map_or(expires_at, |at| at.min(expires_at)));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
