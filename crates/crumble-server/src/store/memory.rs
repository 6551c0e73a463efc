use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use super::{StoreError, TransactOutcome, TransactStep};

const CHANNEL_CAPACITY: usize = 256;

/// In-memory store backend. Cloning shares the underlying state, so two
/// server instances in one process built over clones of the same
/// `MemoryStore` behave like two replicas against one shared store —
/// which is exactly how the cross-replica tests run.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    kv: Mutex<HashMap<String, KvEntry>>,
    queues: Mutex<HashMap<String, Vec<ScoredMember>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Clone)]
struct ScoredMember {
    member: String,
    score: f64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                kv: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn queue_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut queues = self.inner.queues.lock().expect("queues lock");
        let queue = queues.entry(key.to_string()).or_default();
        // Sorted-set semantics: re-adding a member updates its score.
        queue.retain(|m| m.member != member);
        let pos = queue.partition_point(|m| m.score <= score);
        queue.insert(
            pos,
            ScoredMember {
                member: member.to_string(),
                score,
            },
        );
        Ok(())
    }

    pub fn queue_range(&self, key: &str, lo: isize, hi: isize) -> Result<Vec<String>, StoreError> {
        let queues = self.inner.queues.lock().expect("queues lock");
        let Some(queue) = queues.get(key) else {
            return Ok(Vec::new());
        };
        let len = queue.len() as isize;
        let resolve = |idx: isize| -> isize {
            if idx < 0 { len + idx } else { idx }
        };
        let lo = resolve(lo).max(0);
        let hi = resolve(hi).min(len - 1);
        if lo > hi {
            return Ok(Vec::new());
        }
        Ok(queue[lo as usize..=hi as usize]
            .iter()
            .map(|m| m.member.clone())
            .collect())
    }

    pub fn queue_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut queues = self.inner.queues.lock().expect("queues lock");
        if let Some(queue) = queues.get_mut(key) {
            queue.retain(|m| m.member != member);
        }
        Ok(())
    }

    pub fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut kv = self.inner.kv.lock().expect("kv lock");
        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut kv = self.inner.kv.lock().expect("kv lock");
        let now = Instant::now();
        match kv.get(key) {
            Some(entry) if entry.expired(now) => {
                kv.remove(key);
                Ok(None)
            },
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        let mut kv = self.inner.kv.lock().expect("kv lock");
        kv.remove(key);
        Ok(())
    }

    pub fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut kv = self.inner.kv.lock().expect("kv lock");
        let now = Instant::now();
        if let Some(entry) = kv.get(key)
            && !entry.expired(now)
        {
            return Ok(false);
        }
        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    /// The kv mutex is held across the closure, so the read-modify-write
    /// is serialized and a single attempt always suffices.
    pub fn watch_transact<F>(
        &self,
        key: &str,
        ttl: Duration,
        mut f: F,
    ) -> Result<TransactOutcome, StoreError>
    where
        F: FnMut(Option<&str>) -> TransactStep,
    {
        let mut kv = self.inner.kv.lock().expect("kv lock");
        let now = Instant::now();
        let current = match kv.get(key) {
            Some(entry) if !entry.expired(now) => Some(entry.value.clone()),
            _ => None,
        };
        match f(current.as_deref()) {
            TransactStep::Write(value) => {
                kv.insert(
                    key.to_string(),
                    KvEntry {
                        value: value.clone(),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(TransactOutcome::Committed(value))
            },
            TransactStep::Abort => Ok(TransactOutcome::Aborted),
        }
    }

    pub fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let tx = self.sender(channel);
        // No subscribers yet is fine; broadcast only reaches live receivers.
        let _ = tx.send(message.to_string());
        Ok(())
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.inner.channels.lock().expect("channels lock");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn queue_orders_by_score() {
        let store = MemoryStore::new();
        store.queue_add("q", "b", 2.0).unwrap();
        store.queue_add("q", "a", 1.0).unwrap();
        store.queue_add("q", "c", 3.0).unwrap();

        assert_eq!(store.queue_range("q", 0, -1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.queue_range("q", 0, 1).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn queue_re_add_replaces_score() {
        let store = MemoryStore::new();
        store.queue_add("q", "a", 1.0).unwrap();
        store.queue_add("q", "b", 2.0).unwrap();
        store.queue_add("q", "a", 3.0).unwrap();

        assert_eq!(store.queue_range("q", 0, -1).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn queue_remove_member() {
        let store = MemoryStore::new();
        store.queue_add("q", "a", 1.0).unwrap();
        store.queue_add("q", "b", 2.0).unwrap();
        store.queue_remove("q", "a").unwrap();

        assert_eq!(store.queue_range("q", 0, -1).unwrap(), vec!["b"]);
    }

    #[test]
    fn kv_set_get_delete() {
        let store = MemoryStore::new();
        store.kv_set("k", "v", TTL).unwrap();
        assert_eq!(store.kv_get("k").unwrap().as_deref(), Some("v"));

        store.kv_delete("k").unwrap();
        assert_eq!(store.kv_get("k").unwrap(), None);
    }

    #[tokio::test]
    async fn kv_ttl_expires() {
        let store = MemoryStore::new();
        store.kv_set("k", "v", Duration::from_millis(30)).unwrap();
        assert!(store.kv_get("k").unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.kv_get("k").unwrap(), None);
    }

    #[test]
    fn set_if_absent_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "r1", TTL).unwrap());
        assert!(!store.set_if_absent("lock", "r2", TTL).unwrap());
        assert_eq!(store.kv_get("lock").unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn set_if_absent_after_expiry() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "r1", Duration::from_millis(30)).unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.set_if_absent("lock", "r2", TTL).unwrap());
    }

    #[test]
    fn transact_commits_and_aborts() {
        let store = MemoryStore::new();
        store.kv_set("k", "1", TTL).unwrap();

        let outcome = store
            .watch_transact("k", TTL, |cur| {
                let n: i64 = cur.unwrap().parse().unwrap();
                TransactStep::Write((n + 1).to_string())
            })
            .unwrap();
        assert_eq!(outcome, TransactOutcome::Committed("2".to_string()));
        assert_eq!(store.kv_get("k").unwrap().as_deref(), Some("2"));

        let outcome = store.watch_transact("k", TTL, |_| TransactStep::Abort).unwrap();
        assert_eq!(outcome, TransactOutcome::Aborted);
        assert_eq!(store.kv_get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn transact_sees_absent_key() {
        let store = MemoryStore::new();
        let outcome = store
            .watch_transact("missing", TTL, |cur| {
                assert!(cur.is_none());
                TransactStep::Abort
            })
            .unwrap();
        assert_eq!(outcome, TransactOutcome::Aborted);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = MemoryStore::new();
        let mut rx1 = store.subscribe("ch");
        let mut rx2 = store.subscribe("ch");

        store.publish("ch", "hello").unwrap();
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.kv_set("k", "v", TTL).unwrap();
        assert_eq!(clone.kv_get("k").unwrap().as_deref(), Some("v"));

        let mut rx = clone.subscribe("ch");
        store.publish("ch", "cross").unwrap();
        assert_eq!(rx.recv().await.unwrap(), "cross");
    }
}
