use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::identity::IdentityVerifier;
use crate::persist::MatchPersistence;
use crate::registry::ConnectionRegistry;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: SharedStore,
    pub registry: ConnectionRegistry,
    pub identity: IdentityVerifier,
    pub persistence: MatchPersistence,
    /// Unique id of this process among all replicas.
    pub replica_id: String,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, store: SharedStore, persistence: MatchPersistence) -> Self {
        let identity = IdentityVerifier::new(&config.jwt_secret);
        Self {
            config: Arc::new(config),
            store,
            registry: ConnectionRegistry::new(),
            identity,
            persistence,
            replica_id: generate_replica_id(),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Replica id: hostname + pid + startup nanos, unique across a fleet even
/// when pods restart on the same node.
fn generate_replica_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "replica".to_string());
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{host}_{}_{nanos}", std::process::id())
}

/// RAII guard that decrements a counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
