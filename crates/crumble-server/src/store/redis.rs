use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

use super::{MAX_TRANSACT_ATTEMPTS, StoreError, TransactOutcome, TransactStep};

const CHANNEL_CAPACITY: usize = 256;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Redis/Valkey store backend. Regular commands go through a shared
/// `ConnectionManager`; optimistic transactions open a dedicated
/// connection because WATCH state must not be multiplexed; pub/sub runs
/// one forwarding task per channel that fans into a local broadcast.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            conn,
            channels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn queue_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn queue_range(&self, key: &str, lo: isize, hi: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrange(key, lo, hi).await?;
        Ok(members)
    }

    pub async fn queue_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    pub async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// WATCH / MULTI / EXEC loop. EXEC replies nil when another writer
    /// touched the key between WATCH and EXEC, in which case we retry.
    pub async fn watch_transact<F>(
        &self,
        key: &str,
        ttl: Duration,
        mut f: F,
    ) -> Result<TransactOutcome, StoreError>
    where
        F: FnMut(Option<&str>) -> TransactStep,
    {
        for _ in 0..MAX_TRANSACT_ATTEMPTS {
            // Dedicated connection: WATCH is connection-scoped.
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            let _: () = redis::cmd("WATCH").arg(key).query_async(&mut conn).await?;
            let current: Option<String> = conn.get(key).await?;

            match f(current.as_deref()) {
                TransactStep::Abort => {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                    return Ok(TransactOutcome::Aborted);
                },
                TransactStep::Write(value) => {
                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .set_ex(key, &value, ttl.as_secs().max(1))
                        .ignore();
                    let reply: Option<()> = pipe.query_async(&mut conn).await?;
                    if reply.is_some() {
                        return Ok(TransactOutcome::Committed(value));
                    }
                    // Conflict: EXEC aborted, loop and retry.
                },
            }
        }
        Err(StoreError::Contention)
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    pub async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StoreError> {
        let mut channels = self.channels.lock().expect("channels lock");
        if let Some(tx) = channels.get(channel) {
            return Ok(tx.subscribe());
        }
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(channel.to_string(), tx.clone());
        drop(channels);

        tokio::spawn(forward_channel(self.client.clone(), channel.to_string(), tx));
        Ok(rx)
    }
}

/// Long-lived pub/sub pump for one channel. Reconnects with a flat delay
/// if the upstream connection drops; messages published while
/// disconnected are lost, which matches the fire-and-forget bus contract.
async fn forward_channel(client: redis::Client, channel: String, tx: broadcast::Sender<String>) {
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => {
                if let Err(e) = pubsub.subscribe(&channel).await {
                    tracing::warn!(channel, error = %e, "pub/sub subscribe failed");
                } else {
                    tracing::debug!(channel, "pub/sub channel attached");
                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        match msg.get_payload::<String>() {
                            Ok(payload) => {
                                // Send fails only with zero live receivers.
                                let _ = tx.send(payload);
                            },
                            Err(e) => {
                                tracing::warn!(channel, error = %e, "undecodable pub/sub payload");
                            },
                        }
                    }
                    tracing::warn!(channel, "pub/sub stream ended, reconnecting");
                }
            },
            Err(e) => {
                tracing::warn!(channel, error = %e, "pub/sub connect failed");
            },
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}
