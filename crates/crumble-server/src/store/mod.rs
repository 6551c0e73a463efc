mod memory;
mod redis;

use std::time::Duration;

use tokio::sync::broadcast;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Optimistic transactions give up after this many conflicting attempts.
pub const MAX_TRANSACT_ATTEMPTS: u32 = 5;

/// Store key and channel names. One namespace for every replica.
pub mod keys {
    pub const MATCH_QUEUE: &str = "crumble:matchmaking:queue";
    pub const MATCH_LOCK: &str = "crumble:matchmaking:lock";
    pub const MATCH_CHANNEL: &str = "crumble:match:notify";
    pub const EVENT_CHANNEL: &str = "crumble:game:events";

    pub fn room(room_id: &str) -> String {
        format!("crumble:game:{room_id}")
    }
}

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Backend(String),
    Serde(String),
    /// An optimistic transaction kept conflicting past the retry bound.
    Contention,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "store unavailable: {e}"),
            Self::Backend(e) => write!(f, "store backend error: {e}"),
            Self::Serde(e) => write!(f, "store serialization error: {e}"),
            Self::Contention => write!(f, "optimistic transaction exhausted its retries"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

/// One step of an optimistic transaction closure: write a new value for
/// the key, or abort leaving it untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactStep {
    Write(String),
    Abort,
}

/// Result of a completed transaction. `Committed` carries the value that
/// was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactOutcome {
    Committed(String),
    Aborted,
}

/// The shared coordination store: sorted-set matchmaking queue, TTL'd
/// key-value room state with optimistic transactions, a short-TTL mutex,
/// and a broadcast bus.
///
/// Dispatches over two backends the way the original service switches
/// between Redis and its in-process mock: `Memory` for single-replica /
/// test mode, `Redis` for real deployments.
#[derive(Clone)]
pub enum SharedStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl SharedStore {
    pub fn in_memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    /// Connect to Redis and verify the connection with a ping.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self::Redis(RedisStore::connect(url).await?))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }

    /// Add a member to a sorted set, keyed by `score` ascending.
    pub async fn queue_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.queue_add(key, member, score),
            Self::Redis(s) => s.queue_add(key, member, score).await,
        }
    }

    /// Members of a sorted set in score order. `lo`/`hi` are inclusive
    /// indices; `-1` means the last element.
    pub async fn queue_range(&self, key: &str, lo: isize, hi: isize) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Memory(s) => s.queue_range(key, lo, hi),
            Self::Redis(s) => s.queue_range(key, lo, hi).await,
        }
    }

    pub async fn queue_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.queue_remove(key, member),
            Self::Redis(s) => s.queue_remove(key, member).await,
        }
    }

    pub async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.kv_set(key, value, ttl),
            Self::Redis(s) => s.kv_set(key, value, ttl).await,
        }
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Memory(s) => s.kv_get(key),
            Self::Redis(s) => s.kv_get(key).await,
        }
    }

    pub async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.kv_delete(key),
            Self::Redis(s) => s.kv_delete(key).await,
        }
    }

    /// Set a key only if absent, with a TTL. The distributed mutex
    /// primitive: returns true when this caller acquired the key.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self {
            Self::Memory(s) => s.set_if_absent(key, value, ttl),
            Self::Redis(s) => s.set_if_absent(key, value, ttl).await,
        }
    }

    /// Optimistic read-modify-write on a single key. The closure sees the
    /// current value (None if the key is absent) and returns a
    /// [`TransactStep`]. Conflicting writers retry up to
    /// [`MAX_TRANSACT_ATTEMPTS`] times; exhaustion surfaces as
    /// [`StoreError::Contention`] and is logged.
    pub async fn watch_transact<F>(
        &self,
        key: &str,
        ttl: Duration,
        f: F,
    ) -> Result<TransactOutcome, StoreError>
    where
        F: FnMut(Option<&str>) -> TransactStep,
    {
        let result = match self {
            Self::Memory(s) => s.watch_transact(key, ttl, f),
            Self::Redis(s) => s.watch_transact(key, ttl, f).await,
        };
        if matches!(result, Err(StoreError::Contention)) {
            tracing::warn!(key, attempts = MAX_TRANSACT_ATTEMPTS, "transaction retries exhausted");
        }
        result
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.publish(channel, message),
            Self::Redis(s) => s.publish(channel, message).await,
        }
    }

    /// Subscribe to a broadcast channel. Every replica receives every
    /// message published after the subscription is established.
    pub async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StoreError> {
        match self {
            Self::Memory(s) => Ok(s.subscribe(channel)),
            Self::Redis(s) => s.subscribe(channel).await,
        }
    }
}
